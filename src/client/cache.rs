//! Response cache shared across runner threads.

use super::{CompletionRequest, CompletionResponse, Message};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a completion request.
///
/// Temperature is keyed by its bit pattern; bias entries are sorted so two
/// requests with equal maps share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    messages: Vec<Message>,
    temperature_bits: u64,
    logit_bias: Vec<(u32, i32)>,
    max_tokens: u32,
}

impl From<&CompletionRequest> for CacheKey {
    fn from(request: &CompletionRequest) -> Self {
        let mut logit_bias: Vec<(u32, i32)> =
            request.logit_bias.iter().map(|(k, v)| (*k, *v)).collect();
        logit_bias.sort_unstable();
        Self {
            model: request.model.clone(),
            messages: request.messages.clone(),
            temperature_bits: request.temperature.to_bits(),
            logit_bias,
            max_tokens: request.max_tokens,
        }
    }
}

/// Explicit completion cache.
///
/// Handed to [`super::LLMClient`] at construction and cleared by its owner.
#[derive(Debug, Default)]
pub struct CompletionCache {
    entries: DashMap<CacheKey, CompletionResponse>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompletionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, request: &CompletionRequest) -> Option<CompletionResponse> {
        match self.entries.get(&CacheKey::from(request)) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn update(&self, request: &CompletionRequest, response: CompletionResponse) {
        self.entries.insert(CacheKey::from(request), response);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest::new("gpt-4", vec![Message::user(content)])
    }

    fn response(content: &str) -> CompletionResponse {
        CompletionResponse {
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_after_update() {
        let cache = CompletionCache::new();
        assert!(cache.lookup(&request("hi")).is_none());

        cache.update(&request("hi"), response("A"));
        assert_eq!(cache.lookup(&request("hi")).unwrap().content, "A");
        assert!(cache.lookup(&request("bye")).is_none());
        assert_eq!(cache.stats(), (1, 2));
    }

    #[test]
    fn test_bias_order_does_not_matter() {
        let cache = CompletionCache::new();
        let a: HashMap<u32, i32> = [(1, 100), (2, 100), (3, 100)].into_iter().collect();
        let b: HashMap<u32, i32> = [(3, 100), (1, 100), (2, 100)].into_iter().collect();

        cache.update(&request("x").with_logit_bias(a), response("A"));
        assert!(cache.lookup(&request("x").with_logit_bias(b)).is_some());
        assert!(cache.lookup(&request("x")).is_none());
    }

    #[test]
    fn test_clear() {
        let cache = CompletionCache::new();
        cache.update(&request("hi"), response("A"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
