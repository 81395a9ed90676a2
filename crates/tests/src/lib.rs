//! Cross-crate integration tests for Switchyard

#[cfg(test)]
mod arbitration_integration;
