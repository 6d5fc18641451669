//! Scripted collaborators for exercising the query pipeline without a cluster or an LLM.

use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
	time::Duration,
};

use color_eyre::eyre;
use serde_json::{Value, json};

use esgate_config::Config;
use esgate_service::{BoxFuture, ChatProvider, SchemaProvider, SearchBackend};

const HANG: Duration = Duration::from_secs(3_600);

/// Config with short backend timeouts so timeout paths finish quickly.
pub fn test_config() -> Config {
	let mut cfg = Config::default();

	cfg.search_backend.timeout_ms = 200;
	cfg.search_backend.count_timeout_ms = 100;

	cfg
}

/// Search response shaped like Elasticsearch's, one hit per source.
pub fn hits_response(total: u64, sources: Vec<Value>) -> Value {
	let hits: Vec<Value> = sources
		.into_iter()
		.enumerate()
		.map(|(n, source)| {
			json!({
				"_index": "stub",
				"_id": n.to_string(),
				"_score": 1.0,
				"_version": 1,
				"_seq_no": n,
				"_primary_term": 1,
				"_source": source,
			})
		})
		.collect();

	json!({
		"took": 3,
		"timed_out": false,
		"hits": {
			"total": { "value": total, "relation": "eq" },
			"max_score": if hits.is_empty() { Value::Null } else { json!(1.0) },
			"hits": hits,
		}
	})
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
	Search,
	Count,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
	pub kind: CallKind,
	pub index: String,
	pub body: Value,
}

#[derive(Clone, Debug)]
enum Reply {
	Respond(Value),
	Fail(String),
	Hang,
}

/// Search backend answering from per-index scripts and recording every call.
///
/// Unscripted searches return zero hits; unscripted counts return 0.
#[derive(Default)]
pub struct StubSearchBackend {
	search: Mutex<HashMap<String, Reply>>,
	count: Mutex<HashMap<String, Reply>>,
	calls: Mutex<Vec<RecordedCall>>,
}
impl StubSearchBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_search(self, index: &str, response: Value) -> Self {
		self.script_search(index, Reply::Respond(response))
	}

	pub fn with_search_error(self, index: &str, message: &str) -> Self {
		self.script_search(index, Reply::Fail(message.to_string()))
	}

	pub fn with_search_hang(self, index: &str) -> Self {
		self.script_search(index, Reply::Hang)
	}

	pub fn with_count(self, index: &str, count: u64) -> Self {
		self.script_count(index, Reply::Respond(json!(count)))
	}

	pub fn with_count_error(self, index: &str, message: &str) -> Self {
		self.script_count(index, Reply::Fail(message.to_string()))
	}

	pub fn with_count_hang(self, index: &str) -> Self {
		self.script_count(index, Reply::Hang)
	}

	pub fn calls(&self) -> Vec<RecordedCall> {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn calls_of(&self, kind: CallKind) -> Vec<RecordedCall> {
		self.calls().into_iter().filter(|call| call.kind == kind).collect()
	}

	fn script_search(mut self, index: &str, reply: Reply) -> Self {
		self.search.get_mut().unwrap_or_else(|err| err.into_inner()).insert(index.to_string(), reply);

		self
	}

	fn script_count(mut self, index: &str, reply: Reply) -> Self {
		self.count.get_mut().unwrap_or_else(|err| err.into_inner()).insert(index.to_string(), reply);

		self
	}

	fn record(&self, kind: CallKind, index: &str, body: &Value) {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).push(RecordedCall {
			kind,
			index: index.to_string(),
			body: body.clone(),
		});
	}

	fn reply_for(&self, kind: CallKind, index: &str) -> Option<Reply> {
		let scripts = match kind {
			CallKind::Search => &self.search,
			CallKind::Count => &self.count,
		};

		scripts.lock().unwrap_or_else(|err| err.into_inner()).get(index).cloned()
	}
}

impl SearchBackend for StubSearchBackend {
	fn search<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		_timeout: Duration,
	) -> BoxFuture<'a, color_eyre::Result<Value>> {
		self.record(CallKind::Search, index, body);

		let reply = self.reply_for(CallKind::Search, index);

		Box::pin(async move {
			match reply {
				None => Ok(hits_response(0, Vec::new())),
				Some(Reply::Respond(response)) => Ok(response),
				Some(Reply::Fail(message)) => Err(eyre::eyre!(message)),
				Some(Reply::Hang) => {
					tokio::time::sleep(HANG).await;

					Err(eyre::eyre!("stub search hung"))
				},
			}
		})
	}

	fn count<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		_timeout: Duration,
	) -> BoxFuture<'a, color_eyre::Result<u64>> {
		self.record(CallKind::Count, index, body);

		let reply = self.reply_for(CallKind::Count, index);

		Box::pin(async move {
			match reply {
				None => Ok(0),
				Some(Reply::Respond(count)) => {
					count.as_u64().ok_or_else(|| eyre::eyre!("scripted count is not an integer"))
				},
				Some(Reply::Fail(message)) => Err(eyre::eyre!(message)),
				Some(Reply::Hang) => {
					tokio::time::sleep(HANG).await;

					Err(eyre::eyre!("stub count hung"))
				},
			}
		})
	}
}

/// Schema source backed by fixed mappings. Unknown indices fail.
#[derive(Default)]
pub struct StubSchema {
	mappings: HashMap<String, Value>,
}
impl StubSchema {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_mapping(mut self, index: &str, mapping: Value) -> Self {
		self.mappings.insert(index.to_string(), mapping);

		self
	}
}

impl SchemaProvider for StubSchema {
	fn get_schema<'a>(&'a self, index: &'a str) -> BoxFuture<'a, color_eyre::Result<Value>> {
		let mapping = self.mappings.get(index).cloned();

		Box::pin(async move { mapping.ok_or_else(|| eyre::eyre!("no mapping for index {index}")) })
	}
}

/// Chat model that replays canned replies in order and records every prompt.
pub struct ScriptedChat {
	replies: Mutex<VecDeque<String>>,
	received: Mutex<Vec<Vec<Value>>>,
}
impl ScriptedChat {
	pub fn new<I, S>(replies: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
			received: Mutex::new(Vec::new()),
		}
	}

	pub fn received(&self) -> Vec<Vec<Value>> {
		self.received.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}

impl ChatProvider for ScriptedChat {
	fn complete<'a>(&'a self, messages: &'a [Value]) -> BoxFuture<'a, color_eyre::Result<String>> {
		self.received.lock().unwrap_or_else(|err| err.into_inner()).push(messages.to_vec());

		let reply = self.replies.lock().unwrap_or_else(|err| err.into_inner()).pop_front();

		Box::pin(async move { reply.ok_or_else(|| eyre::eyre!("no scripted reply left")) })
	}
}
