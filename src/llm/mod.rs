pub mod invoker;
pub mod prompt;
pub mod retry;
pub mod sanitize;

pub use invoker::{ModelInvoker, OllamaCli, configure_ollama_home};
pub use retry::{FallbackController, RetryPolicy};
