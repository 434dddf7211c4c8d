//! The document-store collaborator contract and its in-memory reference
//! implementation.
//!
//! The real Mongo-backed collection is treated as an external collaborator;
//! `MemoryStore` is the stand-in the binary and the test suite use so the
//! crate stays exercisable end-to-end without a live database, the same way
//! the gateway clients get exercised against in-process fixtures rather than
//! real push endpoints.

use async_trait::async_trait;
use bson::Document;
use tokio::sync::RwLock;

/// Update flags: `multi` applies a mutation to every matching document.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
	/// Apply the mutation to every matching document, not just the first.
	pub multi: bool,
}

/// The minimal query/insert/update contract the dispatch subsystem depends
/// on.
#[async_trait]
pub trait DeviceStore: std::fmt::Debug + Send + Sync {
	/// Inserts `doc`, assigning it a fresh `_id` if absent, and returns that
	/// id as a hex string.
	async fn insert(&self, doc: Document) -> Result<String, String>;

	/// Applies `mutation` (a `$set`-style partial document) to documents
	/// matching `query`, honoring `options.multi`.
	async fn update(
		&self,
		query: &Document,
		mutation: &Document,
		options: UpdateOptions,
	) -> Result<u64, String>;

	/// Replaces a single matching document wholesale with `replacement`.
	/// Returns `true` if a document was matched (and hence replaced).
	async fn replace_one(&self, query: &Document, replacement: Document) -> Result<bool, String>;

	/// Returns up to `limit` documents matching `query`, skipping the first
	/// `offset`.
	async fn query(&self, query: &Document, offset: u64, limit: u64) -> Result<Vec<Document>, String>;

	/// Returns the single document matching `query`, if any.
	async fn find_one(&self, query: &Document) -> Result<Option<Document>, String>;
}

/// An in-memory `DeviceStore`, backed by a single `RwLock<Vec<Document>>`.
/// Linear scan is adequate: Postal's device collections are small relative
/// to the 100-document dispatch batch cap.
#[derive(Debug, Default)]
pub struct MemoryStore {
	documents: RwLock<Vec<Document>>,
}

impl MemoryStore {
	/// An empty store.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Matches flat field equality, plus `$or` (an array of sub-documents,
	/// any of which may match, each evaluated recursively). No other
	/// operator appears in a query document anywhere in this crate.
	fn matches(doc: &Document, query: &Document) -> bool {
		query.iter().all(|(key, expected)| {
			if key == "$or" {
				return expected.as_array().is_some_and(|clauses| {
					clauses.iter().any(|clause| {
						clause.as_document().is_some_and(|clause| Self::matches(doc, clause))
					})
				});
			}
			doc.get(key).is_some_and(|actual| actual == expected)
		})
	}
}

#[async_trait]
impl DeviceStore for MemoryStore {
	async fn insert(&self, mut doc: Document) -> Result<String, String> {
		let id = bson::oid::ObjectId::new();
		doc.insert("_id", id);
		self.documents.write().await.push(doc);
		Ok(id.to_hex())
	}

	async fn update(
		&self,
		query: &Document,
		mutation: &Document,
		options: UpdateOptions,
	) -> Result<u64, String> {
		let mut documents = self.documents.write().await;
		let mut updated = 0u64;
		for doc in documents.iter_mut() {
			if !Self::matches(doc, query) {
				continue;
			}
			for (key, value) in mutation {
				doc.insert(key.clone(), value.clone());
			}
			updated += 1;
			if !options.multi {
				break;
			}
		}
		Ok(updated)
	}

	async fn replace_one(&self, query: &Document, replacement: Document) -> Result<bool, String> {
		let mut documents = self.documents.write().await;
		if let Some(doc) = documents.iter_mut().find(|doc| Self::matches(doc, query)) {
			let id = doc.get("_id").cloned();
			*doc = replacement;
			if let Some(id) = id {
				doc.insert("_id", id);
			}
			Ok(true)
		} else {
			Ok(false)
		}
	}

	async fn query(&self, query: &Document, offset: u64, limit: u64) -> Result<Vec<Document>, String> {
		let documents = self.documents.read().await;
		Ok(documents
			.iter()
			.filter(|doc| Self::matches(doc, query))
			.skip(usize::try_from(offset).unwrap_or(usize::MAX))
			.take(usize::try_from(limit).unwrap_or(usize::MAX))
			.cloned()
			.collect())
	}

	async fn find_one(&self, query: &Document) -> Result<Option<Document>, String> {
		let documents = self.documents.read().await;
		Ok(documents.iter().find(|doc| Self::matches(doc, query)).cloned())
	}
}

#[cfg(test)]
mod tests {
	use bson::doc;

	use super::*;

	#[tokio::test]
	async fn insert_assigns_an_id() {
		let store = MemoryStore::new();
		let id = store.insert(doc! {"user": "u1"}).await.unwrap();
		assert!(!id.is_empty());
	}

	#[tokio::test]
	async fn query_filters_by_equality() {
		let store = MemoryStore::new();
		store.insert(doc! {"user": "u1"}).await.unwrap();
		store.insert(doc! {"user": "u2"}).await.unwrap();
		let results = store.query(&doc! {"user": "u1"}, 0, 100).await.unwrap();
		assert_eq!(results.len(), 1);
	}

	#[tokio::test]
	async fn update_multi_touches_every_match() {
		let store = MemoryStore::new();
		store.insert(doc! {"user": "u1", "removed_at": Bson::Null}).await.unwrap();
		store.insert(doc! {"user": "u1", "removed_at": Bson::Null}).await.unwrap();
		let updated = store
			.update(&doc! {"user": "u1"}, &doc! {"removed_at": "now"}, UpdateOptions { multi: true })
			.await
			.unwrap();
		assert_eq!(updated, 2);
	}

	use bson::Bson;

	#[tokio::test]
	async fn or_clause_matches_any_alternative() {
		let store = MemoryStore::new();
		store.insert(doc! {"user": "u1", "device_token": "t1", "removed_at": Bson::Null}).await.unwrap();
		store.insert(doc! {"user": "u2", "device_token": "t2", "removed_at": Bson::Null}).await.unwrap();
		store.insert(doc! {"user": "u3", "device_token": "t3", "removed_at": Bson::Null}).await.unwrap();

		let query = doc! {
			"removed_at": Bson::Null,
			"$or": [
				{"user": "u1"},
				{"device_token": "t2"},
			],
		};
		let results = store.query(&query, 0, 100).await.unwrap();
		assert_eq!(results.len(), 2);
	}

	#[tokio::test]
	async fn or_clause_with_no_matching_alternative_excludes_document() {
		let store = MemoryStore::new();
		store.insert(doc! {"user": "u1", "removed_at": Bson::Null}).await.unwrap();

		let query = doc! { "$or": [{"user": "nobody"}] };
		let results = store.query(&query, 0, 100).await.unwrap();
		assert!(results.is_empty());
	}
}
