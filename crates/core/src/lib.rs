//! Core of Switchyard: activity detection, observers, volume coalescing and
//! source arbitration. Platform backends live in `switchyard-infra`.

pub mod domain;
