use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::chain::block::Block;
use crate::chain::transaction::Transaction;
use crate::crypto::Submission;

/// A request as carried on the wire: one JSON object per connection,
/// tagged by its `type` field, terminated by a newline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "PING")]
    Ping,

    #[serde(rename = "REGISTER_NODE")]
    RegisterNode {
        node: String,
        /// The caller's election anchor, so both ends can settle on the
        /// cluster-wide minimum. Optional on the wire.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        election_start_time: Option<f64>,
    },

    #[serde(rename = "GET_CHAIN")]
    GetChain,

    #[serde(rename = "GET_PENDING")]
    GetPending,

    #[serde(rename = "GET_NODES")]
    GetNodes,

    #[serde(rename = "DISCOVER_PEERS")]
    DiscoverPeers,

    #[serde(rename = "GET_LEADER")]
    GetLeader,

    /// Either a full transaction (gossip between nodes) or the bare
    /// field triple (client submissions).
    #[serde(rename = "NEW_TRANSACTION")]
    NewTransaction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction: Option<Transaction>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
    },

    #[serde(rename = "LEADER_ELECTION_VRF")]
    LeaderElectionVrf { seed: String },

    #[serde(rename = "ELECT_LEADER")]
    ElectLeader { leader: String },

    #[serde(rename = "BLOCK_PROPOSE")]
    BlockPropose { block: Block },

    #[serde(rename = "BLOCK_COMMIT")]
    BlockCommit { block: Block },

    /// Legacy direct-append path, accepted only when it extends the tip
    /// by exactly one valid block. This node never emits it.
    #[serde(rename = "NEW_BLOCK")]
    NewBlock { block: Block },
}

impl Request {
    /// The gossip form of `NEW_TRANSACTION`: the full transaction, so
    /// receiving nodes keep its id and status.
    pub fn gossip_transaction(transaction: Transaction) -> Self {
        Request::NewTransaction {
            transaction: Some(transaction),
            sender: None,
            recipient: None,
            amount: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Approve,
    Reject,
}

/// Replies carrying a payload, tagged by `type` like requests are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DataReply {
    #[serde(rename = "CHAIN")]
    Chain { chain: Vec<Block> },

    #[serde(rename = "PENDING")]
    Pending { pending: Vec<Transaction> },

    #[serde(rename = "NODES")]
    Nodes { nodes: Vec<String> },

    #[serde(rename = "PEERS")]
    Peers { nodes: Vec<String> },

    #[serde(rename = "LEADER")]
    Leader { leader: Option<String> },
}

/// A response as carried on the wire.
///
/// The reply shapes differ per request, so the enum is untagged and the
/// variants are told apart by their required fields. The declaration
/// order matters for decoding: variants with more distinctive fields
/// come first, the bare status envelope last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Data(DataReply),

    /// `LEADER_ELECTION_VRF` reply: `{status, submission}`.
    Vrf {
        status: String,
        submission: Submission,
    },

    /// `REGISTER_NODE` reply: `{status, message, election_start_time}`.
    Registered {
        status: String,
        message: String,
        election_start_time: f64,
    },

    /// `BLOCK_PROPOSE` reply: `{vote}`.
    Vote { vote: Vote },

    /// Everything else: `{status}` with an optional human message.
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Response {
    pub fn ok() -> Self {
        Response::Status {
            status: "OK".to_string(),
            message: None,
        }
    }

    pub fn ok_message(message: impl Into<String>) -> Self {
        Response::Status {
            status: "OK".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Status {
            status: "Error".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn committed() -> Self {
        Response::Status {
            status: "committed".to_string(),
            message: None,
        }
    }

    pub fn commit_error() -> Self {
        Response::Status {
            status: "error".to_string(),
            message: None,
        }
    }

    pub fn vote(approve: bool) -> Self {
        Response::Vote {
            vote: if approve { Vote::Approve } else { Vote::Reject },
        }
    }
}

/// Encodes and decodes wire values as single-line JSON.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode the given value into a JSON string without the trailing
    /// newline. Returns None if the value cannot be encoded.
    pub fn encode<T: Serialize>(value: &T) -> Option<String> {
        match serde_json::to_string(value) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to encode message to json: {:?}", e);
                None
            }
        }
    }

    /// Decode one received line into a wire value. Returns None on
    /// garbage, unknown types or missing fields.
    pub fn decode<T: DeserializeOwned>(line: &str) -> Option<T> {
        match serde_json::from_str(line.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Failed to decode {:?} into a message: {:?}", line, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod codec_test {
    use super::{DataReply, JsonCodec, Request, Response, Vote};

    #[test]
    fn test_requests_carry_their_wire_tags() {
        assert_eq!(JsonCodec::encode(&Request::Ping).unwrap(), r#"{"type":"PING"}"#);
        assert_eq!(
            JsonCodec::encode(&Request::LeaderElectionVrf {
                seed: "abc".to_string()
            })
            .unwrap(),
            r#"{"type":"LEADER_ELECTION_VRF","seed":"abc"}"#
        );
        assert_eq!(
            JsonCodec::encode(&Request::ElectLeader {
                leader: "127.0.0.1:5001".to_string()
            })
            .unwrap(),
            r#"{"type":"ELECT_LEADER","leader":"127.0.0.1:5001"}"#
        );
    }

    #[test]
    fn test_new_transaction_decodes_both_shapes() {
        let bare: Request = JsonCodec::decode(
            r#"{"type":"NEW_TRANSACTION","sender":"alice","recipient":"bob","amount":7}"#,
        )
        .unwrap();
        match bare {
            Request::NewTransaction {
                transaction,
                sender,
                amount,
                ..
            } => {
                assert!(transaction.is_none());
                assert_eq!(sender.as_deref(), Some("alice"));
                assert_eq!(amount, Some(7.0));
            }
            other => panic!("unexpected request: {:?}", other),
        }

        let full: Request = JsonCodec::decode(concat!(
            r#"{"type":"NEW_TRANSACTION","transaction":{"id":"t-1","sender":"alice","#,
            r#""recipient":"bob","amount":7.0,"status":"pending"}}"#
        ))
        .unwrap();
        match full {
            Request::NewTransaction { transaction, .. } => {
                assert_eq!(transaction.unwrap().id, "t-1");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_fails_to_decode() {
        assert!(JsonCodec::decode::<Request>(r#"{"type":"BOGUS"}"#).is_none());
        assert!(JsonCodec::decode::<Request>("not json at all").is_none());
    }

    #[test]
    fn test_response_shapes_roundtrip() {
        let cases = vec![
            Response::ok(),
            Response::error("Unknown message type."),
            Response::vote(true),
            Response::vote(false),
            Response::committed(),
            Response::Data(DataReply::Nodes {
                nodes: vec!["127.0.0.1:5001".to_string()],
            }),
            Response::Data(DataReply::Leader { leader: None }),
            Response::Registered {
                status: "OK".to_string(),
                message: "Node registered.".to_string(),
                election_start_time: 1234.5,
            },
        ];

        for response in cases {
            let line = JsonCodec::encode(&response).unwrap();
            let decoded: Response = JsonCodec::decode(&line).unwrap();
            assert_eq!(decoded, response, "roundtrip failed for {}", line);
        }
    }

    #[test]
    fn test_vote_reply_wire_form() {
        assert_eq!(
            JsonCodec::encode(&Response::vote(true)).unwrap(),
            r#"{"vote":"approve"}"#
        );
        let decoded: Response = JsonCodec::decode(r#"{"vote":"reject"}"#).unwrap();
        assert_eq!(decoded, Response::Vote { vote: Vote::Reject });
    }
}
