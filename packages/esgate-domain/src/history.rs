use std::{collections::VecDeque, sync::Mutex};

/// Append-only log that keeps at most `cap` entries, evicting the oldest first.
///
/// Shared across concurrent requests; every access takes the single inner lock.
#[derive(Debug)]
pub struct BoundedLog<T> {
	cap: usize,
	entries: Mutex<VecDeque<T>>,
}
impl<T> BoundedLog<T>
where
	T: Clone,
{
	pub fn new(cap: usize) -> Self {
		let cap = cap.max(1);

		Self { cap, entries: Mutex::new(VecDeque::with_capacity(cap.min(1_024))) }
	}

	pub fn cap(&self) -> usize {
		self.cap
	}

	pub fn push(&self, entry: T) {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		if entries.len() == self.cap {
			entries.pop_front();
		}

		entries.push_back(entry);
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Most recent entries, newest last.
	pub fn recent(&self, n: usize) -> Vec<T> {
		let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
		let skip = entries.len().saturating_sub(n);

		entries.iter().skip(skip).cloned().collect()
	}

	pub fn snapshot(&self) -> Vec<T> {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).iter().cloned().collect()
	}

	pub fn find<F>(&self, predicate: F) -> Option<T>
	where
		F: Fn(&T) -> bool,
	{
		let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		entries.iter().rev().find(|entry| predicate(entry)).cloned()
	}

	pub fn filter<F>(&self, predicate: F) -> Vec<T>
	where
		F: Fn(&T) -> bool,
	{
		let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		entries.iter().filter(|entry| predicate(entry)).cloned().collect()
	}
}
