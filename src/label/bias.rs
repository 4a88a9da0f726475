//! Provider capabilities and logit-bias construction.

use crate::client::Tokenizer;
use std::collections::HashMap;
use tracing::debug;

/// What a provider lets us do to constrain a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_logit_bias: bool,
    pub max_bias_value: i32,
    /// Token budget when the answer is pinned to a single biased token.
    pub single_token_max_tokens: u32,
}

impl ProviderCapabilities {
    pub const NONE: Self = Self {
        supports_logit_bias: false,
        max_bias_value: 0,
        single_token_max_tokens: 1,
    };
}

/// Capability lookup by model id.
pub fn capabilities_for(model: &str) -> ProviderCapabilities {
    if model.starts_with("gpt") {
        ProviderCapabilities {
            supports_logit_bias: true,
            max_bias_value: 100,
            single_token_max_tokens: 1,
        }
    } else if model.starts_with("command") {
        ProviderCapabilities {
            supports_logit_bias: true,
            max_bias_value: 10,
            single_token_max_tokens: 1,
        }
    } else {
        ProviderCapabilities::NONE
    }
}

/// Bias every option to the provider's maximum.
///
/// Returns an empty map when the provider has no logit bias, the tokenizer
/// does not know the model, or any option spans more than one token. An
/// empty map means the answer is left unconstrained and parsed afterwards.
pub fn logit_bias_from(
    tokenizer: &dyn Tokenizer,
    model: &str,
    options: &[String],
) -> HashMap<u32, i32> {
    let caps = capabilities_for(model);
    if !caps.supports_logit_bias || options.is_empty() {
        return HashMap::new();
    }

    let mut bias = HashMap::with_capacity(options.len());
    for option in options {
        let tokens = match tokenizer.tokenize(model, option) {
            Ok(tokens) => tokens,
            Err(e) => {
                debug!(model = model, error = %e, "Tokenizer unavailable, skipping logit bias");
                return HashMap::new();
            }
        };
        match tokens.as_slice() {
            [token] => {
                bias.insert(*token, caps.max_bias_value);
            }
            _ => {
                debug!(
                    model = model,
                    option = option.as_str(),
                    tokens = tokens.len(),
                    "Option is not a single token, skipping logit bias"
                );
                return HashMap::new();
            }
        }
    }
    bias
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{NoTokenizer, TokenizeError};

    /// One token per character, ids are code points.
    struct CharTokenizer;

    impl Tokenizer for CharTokenizer {
        fn tokenize(&self, _model: &str, text: &str) -> Result<Vec<u32>, TokenizeError> {
            Ok(text.chars().map(|c| c as u32).collect())
        }
    }

    fn options(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_capability_table() {
        assert_eq!(capabilities_for("gpt-4").max_bias_value, 100);
        assert_eq!(capabilities_for("command-nightly").max_bias_value, 10);
        assert!(!capabilities_for("claude-2").supports_logit_bias);
    }

    #[test]
    fn test_single_token_options() {
        let bias = logit_bias_from(&CharTokenizer, "gpt-4", &options(&["A", "B", "C"]));
        assert_eq!(bias.len(), 3);
        assert_eq!(bias[&('A' as u32)], 100);

        let bias = logit_bias_from(&CharTokenizer, "command", &options(&["1", "2"]));
        assert_eq!(bias[&('2' as u32)], 10);
    }

    #[test]
    fn test_multi_token_option_disables_bias() {
        let bias = logit_bias_from(&CharTokenizer, "gpt-4", &options(&["A", "10"]));
        assert!(bias.is_empty());
    }

    #[test]
    fn test_unsupported_provider_or_tokenizer() {
        assert!(logit_bias_from(&CharTokenizer, "llama-2", &options(&["A"])).is_empty());
        assert!(logit_bias_from(&NoTokenizer, "gpt-4", &options(&["A"])).is_empty());
    }
}
