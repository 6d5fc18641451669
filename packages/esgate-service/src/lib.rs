pub mod analysis;
pub mod executor;
pub mod intelligence;
pub mod iterative;
pub mod optimize;

mod error;

pub use analysis::{Complexity, FieldMap, QueryAnalysis, QueryAnalyzer};
pub use error::{Error, Result};
pub use executor::{BatchResult, ExecutionError, ExecutionOutcome, ExecutionRecord, SafeExecutor};
pub use intelligence::{EnhancedSearchResult, QueryIntelligence, SearchMetrics};
pub use iterative::{IterativeExecutor, IterativeOutcome};
pub use optimize::{QueryOptimizer, Strategy};

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::Value;

use esgate_config::{Config, LlmProviderConfig};
use esgate_domain::threat::{DetectionResult, Message, ThreatScanner};
use esgate_providers::{chat, elasticsearch::ElasticsearchClient};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait SearchBackend
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		timeout: Duration,
	) -> BoxFuture<'a, color_eyre::Result<Value>>;

	fn count<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		timeout: Duration,
	) -> BoxFuture<'a, color_eyre::Result<u64>>;
}

pub trait SchemaProvider
where
	Self: Send + Sync,
{
	/// Returns the index mapping, either bare `{properties}` or the raw `_mapping` response.
	fn get_schema<'a>(&'a self, index: &'a str) -> BoxFuture<'a, color_eyre::Result<Value>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(&'a self, messages: &'a [Value]) -> BoxFuture<'a, color_eyre::Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub search: Arc<dyn SearchBackend>,
	pub schema: Arc<dyn SchemaProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(
		search: Arc<dyn SearchBackend>,
		schema: Arc<dyn SchemaProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { search, schema, chat }
	}

	/// Elasticsearch and chat-completion adapters built from configuration.
	pub fn http(cfg: &Config) -> Result<Self> {
		let provider = Arc::new(HttpProviders {
			es: ElasticsearchClient::new(&cfg.search_backend)?,
			llm: cfg.llm.clone(),
		});

		Ok(Self { search: provider.clone(), schema: provider.clone(), chat: provider })
	}
}

struct HttpProviders {
	es: ElasticsearchClient,
	llm: LlmProviderConfig,
}

impl SearchBackend for HttpProviders {
	fn search<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		timeout: Duration,
	) -> BoxFuture<'a, color_eyre::Result<Value>> {
		Box::pin(async move { Ok(self.es.search(index, body, timeout).await?) })
	}

	fn count<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		timeout: Duration,
	) -> BoxFuture<'a, color_eyre::Result<u64>> {
		Box::pin(async move { Ok(self.es.count(index, body, timeout).await?) })
	}
}

impl SchemaProvider for HttpProviders {
	fn get_schema<'a>(&'a self, index: &'a str) -> BoxFuture<'a, color_eyre::Result<Value>> {
		Box::pin(async move { Ok(self.es.mapping(index).await?) })
	}
}

impl ChatProvider for HttpProviders {
	fn complete<'a>(&'a self, messages: &'a [Value]) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(async move { Ok(chat::complete(&self.llm, messages).await?) })
	}
}

/// Wires the scanner, executor and analysis engine over one set of collaborators.
pub struct EsGateService {
	pub cfg: Config,
	pub providers: Providers,
	pub scanner: Arc<ThreatScanner>,
	pub executor: SafeExecutor,
	pub intelligence: QueryIntelligence,
}
impl EsGateService {
	pub fn new(cfg: Config) -> Result<Self> {
		let providers = Providers::http(&cfg)?;

		Ok(Self::with_providers(cfg, providers))
	}

	pub fn with_providers(cfg: Config, providers: Providers) -> Self {
		let scanner = Arc::new(ThreatScanner::new(&cfg.security));
		let executor = SafeExecutor::new(&cfg, scanner.clone(), providers.search.clone());
		let intelligence = QueryIntelligence::new(
			&cfg,
			scanner.clone(),
			providers.search.clone(),
			providers.schema.clone(),
		);

		Self { cfg, providers, scanner, executor, intelligence }
	}

	pub fn scan_messages(&self, messages: &[Message]) -> DetectionResult {
		self.scanner.detect(messages)
	}

	/// Runs every query embedded in `text` through the safety pipeline.
	pub async fn execute_llm_output(
		&self,
		text: &str,
		conversation_id: &str,
		question: Option<&str>,
	) -> BatchResult {
		self.executor.execute_text(text, conversation_id, question).await
	}

	/// Asks the LLM for queries and re-prompts it on retryable failures.
	pub async fn converse(
		&self,
		messages: Vec<Value>,
		conversation_id: &str,
		question: Option<&str>,
	) -> Result<IterativeOutcome> {
		IterativeExecutor::new(&self.executor, self.providers.chat.as_ref(), &self.cfg.executor)
			.run(messages, conversation_id, question)
			.await
	}

	pub async fn search(
		&self,
		index: &str,
		body: &Value,
		strategy: Strategy,
	) -> Result<EnhancedSearchResult> {
		self.intelligence.search(index, body, strategy).await
	}
}
