//! Error types shared across discovery and delivery

use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("configured sink address {0} is not reachable")]
    OperatorAddressUnreachable(Ipv4Addr),

    #[error("no sink device found after scanning {subnets} subnet(s)")]
    SinkNotFound { subnets: usize },
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink {address} unreachable: {source}")]
    Unreachable {
        address: Ipv4Addr,
        #[source]
        source: reqwest::Error,
    },

    #[error("sink {address} rejected telemetry with {status}: {body}")]
    Rejected {
        address: Ipv4Addr,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid subnet prefix '{0}', expected three octets like 192.168.1")]
pub struct SubnetParseError(pub String);
