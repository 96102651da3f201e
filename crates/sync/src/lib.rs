//! Headers pre-sync: anti-DoS verification of peer-supplied header chains.

pub mod headers;

pub use headers::{
    ChainAnchor, HeadersSync, HeadersSyncParams, HeadersSyncResult, State, MAX_HEADERS_RESULTS,
};
