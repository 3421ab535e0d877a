//! Crate-level tests driving sessions against a scripted VM.
