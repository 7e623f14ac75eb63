//! Concrete [`gateway_core::AgentHandler`] implementations. Kept out of `gateway-core`
//! (design §1, §4.7) since each one pulls in its own HTTP client and wire format; this
//! crate only ever hands the core a `dyn AgentHandler`.

mod ollama;
mod openai_compat;

use std::sync::Arc;

use gateway_core::{AgentHandler, DemoAdapter};

pub use ollama::OllamaAdapter;
pub use openai_compat::OpenAiCompatAdapter;

/// Which backend `gateway.toml`/CLI flags selected.
#[derive(Debug, Clone)]
pub enum Backend {
    /// The keyword-matching fallback shipped in `gateway-core`; used when nothing else is
    /// configured so the server is usable out of the box.
    Demo,
    Ollama { base_url: String, model: String },
    OpenAiCompat {
        base_url: String,
        model: String,
        api_key: Option<String>,
    },
}

impl Backend {
    pub fn build(&self) -> Arc<dyn AgentHandler> {
        match self {
            Backend::Demo => Arc::new(DemoAdapter::new()),
            Backend::Ollama { base_url, model } => {
                Arc::new(OllamaAdapter::new(base_url.clone(), model.clone()))
            }
            Backend::OpenAiCompat {
                base_url,
                model,
                api_key,
            } => Arc::new(OpenAiCompatAdapter::new(
                base_url.clone(),
                model.clone(),
                api_key.clone(),
            )),
        }
    }
}

/// Resolves a [`Backend`] from CLI flags, falling back to [`Backend::Demo`] when no backend
/// is named. `base_url`/`model`/`api_key` are ignored for `"demo"`.
pub fn select_backend(
    name: &str,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
) -> Result<Backend, String> {
    match name {
        "demo" => Ok(Backend::Demo),
        "ollama" => Ok(Backend::Ollama {
            base_url: base_url.unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            model: model.unwrap_or_else(|| "llama3".to_string()),
        }),
        "openai" | "openai-compat" => Ok(Backend::OpenAiCompat {
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            api_key,
        }),
        other => Err(format!("unknown backend: {other} (expected demo, ollama, or openai)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_backend_defaults_to_demo() {
        assert!(matches!(select_backend("demo", None, None, None), Ok(Backend::Demo)));
    }

    #[test]
    fn select_backend_fills_in_ollama_defaults() {
        let backend = select_backend("ollama", None, None, None).unwrap();
        match backend {
            Backend::Ollama { base_url, model } => {
                assert_eq!(base_url, "http://127.0.0.1:11434");
                assert_eq!(model, "llama3");
            }
            _ => panic!("expected Ollama"),
        }
    }

    #[test]
    fn select_backend_rejects_unknown_name() {
        assert!(select_backend("carrier-pigeon", None, None, None).is_err());
    }
}
