//! Wire verbs spoken between the master and its peers.
//!
//! Everything on the wire is a `\r\n`-terminated UTF-8 line of
//! space-separated tokens. Fields that may contain spaces are URL-encoded
//! with [`encode_field`] before they are placed in a line.

use crate::error::{BrokerError, Result};

/// Greeting line a freshly connected peer sends the master.
///
/// The optional trailing token is the port the peer listens on for its
/// pair; when absent, the master advertises the source port of the
/// greeting connection instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    /// A worker offering to serve. Sent by worker nodes.
    RequestClient { listen_port: Option<u16> },
    /// A client asking to be served.
    RequestWorker { listen_port: Option<u16> },
    /// Peer is leaving before being paired.
    Bye,
}

impl Greeting {
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_ascii_whitespace();
        let verb = tokens
            .next()
            .ok_or_else(|| BrokerError::Protocol("empty greeting".into()))?;
        let listen_port = match tokens.next() {
            Some(tok) => Some(
                tok.parse::<u16>()
                    .map_err(|_| BrokerError::Protocol(format!("bad listen port {tok:?}")))?,
            ),
            None => None,
        };
        if tokens.next().is_some() {
            return Err(BrokerError::Protocol(format!(
                "trailing tokens in greeting {line:?}"
            )));
        }
        match verb {
            "REQUEST_CLIENT" => Ok(Greeting::RequestClient { listen_port }),
            "REQUEST_WORKER" => Ok(Greeting::RequestWorker { listen_port }),
            "BYE" => {
                if listen_port.is_some() {
                    return Err(BrokerError::Protocol("BYE takes no arguments".into()));
                }
                Ok(Greeting::Bye)
            }
            other => Err(BrokerError::Protocol(format!("unknown greeting {other:?}"))),
        }
    }
}

/// Messages the master sends a paired (or aborted) peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterReply {
    /// The peer's dialable address.
    PairInfo { host: String, port: u16 },
    /// The pairing fell through after this side was already informed.
    PairAbort,
}

impl MasterReply {
    pub fn encode(&self) -> String {
        match self {
            MasterReply::PairInfo { host, port } => format!("PAIR_INFO {host} {port}"),
            MasterReply::PairAbort => "PAIR_ABORT".to_string(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        match tokens.as_slice() {
            ["PAIR_INFO", host, port] => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| BrokerError::Protocol(format!("bad pair port {port:?}")))?;
                Ok(MasterReply::PairInfo {
                    host: host.to_string(),
                    port,
                })
            }
            ["PAIR_ABORT"] => Ok(MasterReply::PairAbort),
            _ => Err(BrokerError::Protocol(format!(
                "unrecognized master reply {line:?}"
            ))),
        }
    }
}

/// URL-encode a field so it survives space-separated tokenization.
pub fn encode_field(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Inverse of [`encode_field`]. Invalid escapes are a protocol error.
pub fn decode_field(token: &str) -> Result<String> {
    urlencoding::decode(token)
        .map(|cow| cow.into_owned())
        .map_err(|_| BrokerError::Protocol(format!("bad field encoding {token:?}")))
}
