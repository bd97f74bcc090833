//! Test doubles for the sync core: an in-memory paged email provider and a
//! canned-output LLM client. Scenario tests in `tests/` compose these with
//! the real roles against a disposable Postgres database.

pub mod mock_llm;
pub mod mock_provider;

pub use mock_llm::MockLlm;
pub use mock_provider::MockProvider;
