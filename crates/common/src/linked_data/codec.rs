use ipld_core::ipld::Ipld;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::BlockId;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("dag-cbor encode error: {0}")]
    Encode(#[from] serde_ipld_dagcbor::EncodeError<std::collections::TryReserveError>),
    #[error("dag-cbor decode error: {0}")]
    Decode(#[from] serde_ipld_dagcbor::DecodeError<std::convert::Infallible>),
}

/// A type stored as a structured block.
///
/// Structured blocks are always dag-cbor encoded; any [`BlockId`] field
/// serializes as a CBOR tag 42 link, which is what lets the store walk
/// the DAG without decoding application semantics.
pub trait BlockEncoded: Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_ipld_dagcbor::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_ipld_dagcbor::from_slice(bytes)?)
    }
}

/// Extract the child links embedded in a structured block's encoding.
///
/// Decodes to the generic IPLD data model, so it works on any
/// structured block regardless of its schema.
pub fn block_links(bytes: &[u8]) -> Result<Vec<BlockId>, CodecError> {
    let ipld: Ipld = serde_ipld_dagcbor::from_slice(bytes)?;
    let mut links = Vec::new();
    collect_links(&ipld, &mut links);
    Ok(links)
}

fn collect_links(ipld: &Ipld, out: &mut Vec<BlockId>) {
    match ipld {
        Ipld::Link(cid) => out.push(BlockId::from(*cid)),
        Ipld::List(items) => {
            for item in items {
                collect_links(item, out);
            }
        }
        Ipld::Map(map) => {
            for value in map.values() {
                collect_links(value, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestNode {
        name: String,
        children: Vec<BlockId>,
        payload: Option<BlockId>,
    }

    impl BlockEncoded for TestNode {}

    #[test]
    fn test_encode_decode_round_trip() {
        let node = TestNode {
            name: "root".to_string(),
            children: vec![BlockId::raw(b"a"), BlockId::raw(b"b")],
            payload: Some(BlockId::structured(b"c")),
        };
        let encoded = node.encode().unwrap();
        let decoded = TestNode::decode(&encoded).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_block_links_finds_nested_links() {
        let a = BlockId::raw(b"a");
        let b = BlockId::raw(b"b");
        let c = BlockId::structured(b"c");
        let node = TestNode {
            name: "root".to_string(),
            children: vec![a, b],
            payload: Some(c),
        };
        let encoded = node.encode().unwrap();
        let links = block_links(&encoded).unwrap();
        assert_eq!(links.len(), 3);
        assert!(links.contains(&a));
        assert!(links.contains(&b));
        assert!(links.contains(&c));
    }

    #[test]
    fn test_block_links_empty_without_links() {
        let node = TestNode {
            name: "leaf".to_string(),
            children: vec![],
            payload: None,
        };
        let encoded = node.encode().unwrap();
        assert!(block_links(&encoded).unwrap().is_empty());
    }
}
