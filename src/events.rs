use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event Approval(address indexed owner, address indexed spender, uint256 value);
    event OwnershipTransferred(address indexed previousOwner, address indexed newOwner);
    event TokensMinted(address indexed to, uint256 amount);
    event TokensBurned(address indexed from, uint256 amount);

    event ProposalCreated(
        uint256 indexed proposalId,
        string description,
        address recipient,
        uint256 amount,
        uint256 votingDeadline,
        uint256 minVotesToPass
    );
    event Voted(uint256 indexed proposalId, address indexed voter);
    event ProposalExecuted(uint256 indexed proposalId);
}

/// ERC-721 `Transfer`/`Approval` share the ERC-20 signatures but index the
/// token id as a fourth topic.
const ERC721_TOPIC_COUNT: usize = 4;

/// Position of an event in the chain plus the timestamp of its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMeta {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub block_timestamp: u64,
}

impl EventMeta {
    pub fn key(&self) -> EventKey {
        EventKey {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

/// Unique identity of an event record: `(transaction hash, log index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{}", self.transaction_hash, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Mint {
        to: Address,
        amount: U256,
    },
    Burn {
        from: Address,
        amount: U256,
    },
    Transfer {
        from: Address,
        to: Address,
        amount: U256,
    },
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: U256,
    },
    ProposalCreated {
        proposal_id: U256,
        description: String,
        recipient: Address,
        amount: U256,
        voting_deadline: U256,
        min_votes_to_pass: U256,
    },
    ProposalExecuted {
        proposal_id: U256,
    },
    Voted {
        proposal_id: U256,
        voter: Address,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::Mint { .. } => EventKind::Mint,
            LedgerEvent::Burn { .. } => EventKind::Burn,
            LedgerEvent::Transfer { .. } => EventKind::Transfer,
            LedgerEvent::OwnershipTransferred { .. } => EventKind::OwnershipTransferred,
            LedgerEvent::Approval { .. } => EventKind::Approval,
            LedgerEvent::ProposalCreated { .. } => EventKind::ProposalCreated,
            LedgerEvent::ProposalExecuted { .. } => EventKind::ProposalExecuted,
            LedgerEvent::Voted { .. } => EventKind::Vote,
        }
    }
}

/// A decoded event together with its chain position.
///
/// Once persisted this doubles as the immutable audit record for the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    pub meta: EventMeta,
    pub event: LedgerEvent,
}

impl TokenEvent {
    pub fn new(meta: EventMeta, event: LedgerEvent) -> Self {
        Self { meta, event }
    }

    pub fn key(&self) -> EventKey {
        self.meta.key()
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Mint,
    Burn,
    Transfer,
    OwnershipTransferred,
    Approval,
    ProposalCreated,
    ProposalExecuted,
    Vote,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Mint,
        EventKind::Burn,
        EventKind::Transfer,
        EventKind::OwnershipTransferred,
        EventKind::Approval,
        EventKind::ProposalCreated,
        EventKind::ProposalExecuted,
        EventKind::Vote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
            EventKind::Transfer => "transfer",
            EventKind::OwnershipTransferred => "ownership",
            EventKind::Approval => "approval",
            EventKind::ProposalCreated => "proposal",
            EventKind::ProposalExecuted => "execution",
            EventKind::Vote => "vote",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mint" | "mints" => Ok(EventKind::Mint),
            "burn" | "burns" => Ok(EventKind::Burn),
            "transfer" | "transfers" => Ok(EventKind::Transfer),
            "ownership" | "ownership-transferred" => Ok(EventKind::OwnershipTransferred),
            "approval" | "approvals" => Ok(EventKind::Approval),
            "proposal" | "proposals" | "proposal-created" => Ok(EventKind::ProposalCreated),
            "execution" | "executions" | "proposal-executed" => Ok(EventKind::ProposalExecuted),
            "vote" | "votes" | "voted" => Ok(EventKind::Vote),
            other => Err(anyhow::anyhow!("Unknown event kind: {}", other)),
        }
    }
}

/// topic0 filter for the token contract.
pub fn token_topics() -> Vec<B256> {
    vec![
        TokensMinted::SIGNATURE_HASH,
        TokensBurned::SIGNATURE_HASH,
        Transfer::SIGNATURE_HASH,
        OwnershipTransferred::SIGNATURE_HASH,
        Approval::SIGNATURE_HASH,
    ]
}

/// topic0 filter for the proposal contract.
pub fn proposal_topics() -> Vec<B256> {
    vec![
        ProposalCreated::SIGNATURE_HASH,
        ProposalExecuted::SIGNATURE_HASH,
        Voted::SIGNATURE_HASH,
    ]
}

/// Decode a raw log into a [`TokenEvent`].
///
/// Returns `Ok(None)` for logs this crate does not index: an unknown topic0,
/// or an ERC-721 `Transfer`/`Approval` sharing the ERC-20 signature. Any other
/// log with a known topic0 must decode, or the error is returned.
/// `fallback_timestamp` is used when the node did not include `blockTimestamp`
/// in the log itself.
pub fn decode_log(log: &Log, fallback_timestamp: Option<u64>) -> Result<Option<TokenEvent>> {
    let topics = log.topics();
    let Some(topic0) = topics.first().copied() else {
        return Ok(None);
    };
    let data = &log.data().data;

    let is_nft_shaped = topics.len() == ERC721_TOPIC_COUNT;
    let event = if topic0 == TokensMinted::SIGNATURE_HASH {
        let decoded = TokensMinted::decode_raw_log(topics, data)?;
        LedgerEvent::Mint {
            to: decoded.to,
            amount: decoded.amount,
        }
    } else if topic0 == TokensBurned::SIGNATURE_HASH {
        let decoded = TokensBurned::decode_raw_log(topics, data)?;
        LedgerEvent::Burn {
            from: decoded.from,
            amount: decoded.amount,
        }
    } else if topic0 == Transfer::SIGNATURE_HASH {
        if is_nft_shaped {
            return Ok(None);
        }
        let decoded = Transfer::decode_raw_log(topics, data)?;
        LedgerEvent::Transfer {
            from: decoded.from,
            to: decoded.to,
            amount: decoded.value,
        }
    } else if topic0 == OwnershipTransferred::SIGNATURE_HASH {
        let decoded = OwnershipTransferred::decode_raw_log(topics, data)?;
        LedgerEvent::OwnershipTransferred {
            previous_owner: decoded.previousOwner,
            new_owner: decoded.newOwner,
        }
    } else if topic0 == Approval::SIGNATURE_HASH {
        if is_nft_shaped {
            return Ok(None);
        }
        let decoded = Approval::decode_raw_log(topics, data)?;
        LedgerEvent::Approval {
            owner: decoded.owner,
            spender: decoded.spender,
            amount: decoded.value,
        }
    } else if topic0 == ProposalCreated::SIGNATURE_HASH {
        let decoded = ProposalCreated::decode_raw_log(topics, data)?;
        LedgerEvent::ProposalCreated {
            proposal_id: decoded.proposalId,
            description: decoded.description,
            recipient: decoded.recipient,
            amount: decoded.amount,
            voting_deadline: decoded.votingDeadline,
            min_votes_to_pass: decoded.minVotesToPass,
        }
    } else if topic0 == ProposalExecuted::SIGNATURE_HASH {
        let decoded = ProposalExecuted::decode_raw_log(topics, data)?;
        LedgerEvent::ProposalExecuted {
            proposal_id: decoded.proposalId,
        }
    } else if topic0 == Voted::SIGNATURE_HASH {
        let decoded = Voted::decode_raw_log(topics, data)?;
        LedgerEvent::Voted {
            proposal_id: decoded.proposalId,
            voter: decoded.voter,
        }
    } else {
        return Ok(None);
    };

    let meta = EventMeta {
        transaction_hash: log
            .transaction_hash
            .context("Log is missing transaction hash")?,
        log_index: log.log_index.context("Log is missing log index")?,
        block_number: log.block_number.context("Log is missing block number")?,
        block_timestamp: log
            .block_timestamp
            .or(fallback_timestamp)
            .context("Log is missing block timestamp")?,
    };

    Ok(Some(TokenEvent::new(meta, event)))
}

/// Sort events into delivery order: block number, then log index.
///
/// Log indices are unique within a block, so this is a total order for one chain.
pub fn sort_canonical(events: &mut [TokenEvent]) {
    events.sort_by_key(|e| (e.meta.block_number, e.meta.log_index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    fn rpc_log(data: alloy_primitives::LogData, block_timestamp: Option<u64>) -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: address!("0x00000000000000000000000000000000000000aa"),
                data,
            },
            block_hash: None,
            block_number: Some(42),
            block_timestamp,
            transaction_hash: Some(b256!(
                "0x1111111111111111111111111111111111111111111111111111111111111111"
            )),
            transaction_index: Some(0),
            log_index: Some(3),
            removed: false,
        }
    }

    #[test]
    fn decodes_mint_with_fallback_timestamp() {
        let to = address!("0x0000000000000000000000000000000000000001");
        let data = TokensMinted {
            to,
            amount: U256::from(100),
        }
        .encode_log_data();

        let event = decode_log(&rpc_log(data, None), Some(1_700_000_000))
            .unwrap()
            .unwrap();

        assert_eq!(
            event.event,
            LedgerEvent::Mint {
                to,
                amount: U256::from(100)
            }
        );
        assert_eq!(event.meta.block_number, 42);
        assert_eq!(event.meta.log_index, 3);
        assert_eq!(event.meta.block_timestamp, 1_700_000_000);
    }

    #[test]
    fn log_timestamp_wins_over_fallback() {
        let data = Approval {
            owner: address!("0x0000000000000000000000000000000000000001"),
            spender: address!("0x0000000000000000000000000000000000000002"),
            value: U256::from(5),
        }
        .encode_log_data();

        let event = decode_log(&rpc_log(data, Some(10)), Some(99))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), EventKind::Approval);
        assert_eq!(event.meta.block_timestamp, 10);
    }

    #[test]
    fn missing_timestamp_is_an_error() {
        let data = TokensBurned {
            from: Address::ZERO,
            amount: U256::from(1),
        }
        .encode_log_data();

        assert!(decode_log(&rpc_log(data, None), None).is_err());
    }

    #[test]
    fn unknown_topic_is_skipped() {
        let data = alloy_primitives::LogData::new_unchecked(
            vec![b256!(
                "0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
            )],
            Default::default(),
        );
        let decoded = decode_log(&rpc_log(data, Some(1)), None).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn nft_transfer_sharing_the_signature_is_skipped() {
        let data = alloy_primitives::LogData::new_unchecked(
            vec![
                Transfer::SIGNATURE_HASH,
                B256::ZERO,
                B256::with_last_byte(1),
                B256::with_last_byte(7),
            ],
            Default::default(),
        );
        let decoded = decode_log(&rpc_log(data, Some(1)), None).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn malformed_tracked_log_is_an_error() {
        // TokensMinted with its amount word missing.
        let data = alloy_primitives::LogData::new_unchecked(
            vec![TokensMinted::SIGNATURE_HASH, B256::with_last_byte(1)],
            Default::default(),
        );
        assert!(decode_log(&rpc_log(data, Some(1)), None).is_err());
    }

    #[test]
    fn decodes_proposal_events() {
        let recipient = address!("0x0000000000000000000000000000000000000009");
        let created = ProposalCreated {
            proposalId: U256::from(4),
            description: "fund the audit".to_string(),
            recipient,
            amount: U256::from(1_000),
            votingDeadline: U256::from(1_700_086_400u64),
            minVotesToPass: U256::from(3),
        }
        .encode_log_data();

        let event = decode_log(&rpc_log(created, Some(1)), None)
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), EventKind::ProposalCreated);
        assert_eq!(
            event.event,
            LedgerEvent::ProposalCreated {
                proposal_id: U256::from(4),
                description: "fund the audit".to_string(),
                recipient,
                amount: U256::from(1_000),
                voting_deadline: U256::from(1_700_086_400u64),
                min_votes_to_pass: U256::from(3),
            }
        );

        let vote = Voted {
            proposalId: U256::from(4),
            voter: recipient,
        }
        .encode_log_data();
        let event = decode_log(&rpc_log(vote, Some(1)), None).unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::Vote);
    }

    #[test]
    fn canonical_order_is_block_then_log_index() {
        let meta = |block_number, log_index| EventMeta {
            transaction_hash: B256::ZERO,
            log_index,
            block_number,
            block_timestamp: 0,
        };
        let event = LedgerEvent::Burn {
            from: Address::ZERO,
            amount: U256::from(1),
        };
        let mut events = vec![
            TokenEvent::new(meta(2, 0), event.clone()),
            TokenEvent::new(meta(1, 7), event.clone()),
            TokenEvent::new(meta(1, 2), event),
        ];

        sort_canonical(&mut events);

        let order: Vec<_> = events
            .iter()
            .map(|e| (e.meta.block_number, e.meta.log_index))
            .collect();
        assert_eq!(order, vec![(1, 2), (1, 7), (2, 0)]);
    }

    #[test]
    fn parses_event_kinds() {
        assert_eq!("Mints".parse::<EventKind>().unwrap(), EventKind::Mint);
        assert_eq!(
            "ownership".parse::<EventKind>().unwrap(),
            EventKind::OwnershipTransferred
        );
        assert_eq!("votes".parse::<EventKind>().unwrap(), EventKind::Vote);
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("swap".parse::<EventKind>().is_err());
    }
}
