// SPDX-License-Identifier: Apache-2.0
//! Chaincode invocation targets and the cache keys derived from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A single chaincode invocation target within an invocation chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChaincodeCall {
    /// The chaincode name.
    pub id: String,
    /// Private data collections accessed by the invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
}

impl ChaincodeCall {
    /// Create a call for the chaincode `id` without collections.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), collections: Vec::new() }
    }

    /// Add private data collections to the call.
    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections.extend(collections.into_iter().map(Into::into));
        self
    }
}

/// An ordered sequence of chaincode calls.
///
/// The first call is the chaincode invoked by the client. Remaining calls are chaincodes
/// invoked by the first one (chaincode-to-chaincode calls). Equality is structural so two
/// chains built independently with the same content are interchangeable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationChain(Vec<ChaincodeCall>);

impl InvocationChain {
    /// Create a new instance of `Self`.
    pub fn new(calls: Vec<ChaincodeCall>) -> Self {
        Self(calls)
    }

    /// The chaincode invoked directly by the client.
    pub fn primary(&self) -> Option<&ChaincodeCall> {
        self.0.first()
    }

    /// All calls in invocation order.
    pub fn calls(&self) -> &[ChaincodeCall] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The canonical key for this chain.
    ///
    /// The key is the JSON encoding of the calls, so it is stable across processes and
    /// independent of which instance produced it.
    pub fn cache_key(&self) -> CacheKey {
        let calls = self
            .0
            .iter()
            .map(|call| {
                let mut object = Map::new();
                object.insert("id".to_string(), Value::from(call.id.as_str()));
                if !call.collections.is_empty() {
                    object.insert("collections".to_string(), Value::from(call.collections.clone()));
                }
                Value::Object(object)
            })
            .collect();
        CacheKey(Value::Array(calls).to_string())
    }
}

impl From<Vec<ChaincodeCall>> for InvocationChain {
    fn from(calls: Vec<ChaincodeCall>) -> Self {
        Self(calls)
    }
}

impl From<&[ChaincodeCall]> for InvocationChain {
    fn from(calls: &[ChaincodeCall]) -> Self {
        Self(calls.to_vec())
    }
}

impl fmt::Display for InvocationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.0.iter().map(|call| call.id.as_str()).collect();
        write!(f, "[{}]", ids.join(" -> "))
    }
}

/// Canonical string identifying an [InvocationChain].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
