//! Trie-based URL router matching path templates with `:name` segments.
//!
//! Grounded on `examples/original_source/src/cut-n-paste/url-router.c`: a
//! tree of nodes keyed by path segment, descended one segment at a time,
//! preferring a literal child over the node's (at most one) wildcard child.

use std::collections::HashMap;

/// Parameters captured from `:name` segments while routing a path.
pub type Params = HashMap<String, String>;

#[derive(Debug)]
enum Edge {
	/// Matches a segment byte-for-byte.
	Literal(String),
	/// Matches any single segment and binds it under `name`.
	Wildcard(String),
}

#[derive(Debug)]
struct Node<H> {
	edge: Edge,
	handler: Option<H>,
	children: Vec<Node<H>>,
}

impl<H> Node<H> {
	fn new(edge: Edge) -> Self {
		Self { edge, handler: None, children: Vec::new() }
	}
}

/// A trie matcher for path templates of the form `/a/:b/c`.
///
/// Built once at startup and read-only thereafter: no interior mutability,
/// `add_handler` takes `&mut self`.
#[derive(Debug)]
pub struct UrlRouter<H> {
	root: Node<H>,
}

/// Error returned by [`UrlRouter::add_handler`] when two different wildcard
/// names are registered as siblings at the same depth.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("conflicting wildcard name at this depth: {existing} vs {new}")]
pub struct WildcardConflict {
	/// The wildcard name already registered at this depth.
	pub existing: String,
	/// The wildcard name the new pattern tried to register.
	pub new: String,
}

impl<H> Default for UrlRouter<H> {
	fn default() -> Self {
		Self::new()
	}
}

impl<H> UrlRouter<H> {
	/// Creates an empty router. The root node carries no handler and an
	/// empty label, mirroring `url_router_new`.
	#[must_use]
	pub fn new() -> Self {
		Self { root: Node::new(Edge::Literal(String::new())) }
	}

	/// Registers `handler` for `pattern`, a `/`-separated path template.
	/// Segments starting with `:` bind a named parameter; all others must
	/// match literally.
	///
	/// # Errors
	///
	/// Returns [`WildcardConflict`] if a wildcard child already exists at
	/// this depth under a different name.
	pub fn add_handler(&mut self, pattern: &str, handler: H) -> Result<(), WildcardConflict> {
		let pattern = pattern.strip_prefix('/').unwrap_or(pattern);
		let segments: Vec<&str> = if pattern.is_empty() { Vec::new() } else { pattern.split('/').collect() };

		let mut node = &mut self.root;
		for (i, segment) in segments.iter().enumerate() {
			let is_last = i + 1 == segments.len();
			let is_wildcard = segment.starts_with(':');

			let existing_idx = node.children.iter().position(|c| match (&c.edge, is_wildcard) {
				(Edge::Literal(label), false) => label == segment,
				(Edge::Wildcard(_), true) => true,
				_ => false,
			});

			if let Some(idx) = existing_idx {
				if is_wildcard {
					if let Edge::Wildcard(existing_name) = &node.children[idx].edge {
						let new_name = &segment[1..];
						if existing_name != new_name {
							return Err(WildcardConflict {
								existing: existing_name.clone(),
								new: new_name.to_owned(),
							});
						}
					}
				}
				node = &mut node.children[idx];
			} else {
				let edge = if is_wildcard {
					Edge::Wildcard(segment[1..].to_owned())
				} else {
					Edge::Literal((*segment).to_owned())
				};
				node.children.push(Node::new(edge));
				let last = node.children.len() - 1;
				node = &mut node.children[last];
			}

			if is_last {
				node.handler = Some(handler);
				return Ok(());
			}
		}

		// Empty pattern ("/"): handler attaches to the root itself.
		self.root.handler = Some(handler);
		Ok(())
	}

	/// Matches `path` against the registered patterns, returning the
	/// handler and captured parameters. A single trailing `/` is tolerated.
	/// Returns `None` if no pattern matches or the matching node has no
	/// handler — the caller (the HTTP collaborator) surfaces that as 404.
	#[must_use]
	pub fn route(&self, path: &str) -> Option<(&H, Params)>
	where
		H: Clone,
	{
		let path = path.strip_prefix('/').unwrap_or(path);
		let path = path.strip_suffix('/').unwrap_or(path);
		let segments: Vec<&str> = if path.is_empty() { Vec::new() } else { path.split('/').collect() };

		let mut node = &self.root;
		let mut params = Params::new();

		for segment in segments {
			if segment.is_empty() {
				// An internal empty segment (e.g. `/a//b`) never matches.
				return None;
			}

			let literal = node
				.children
				.iter()
				.find(|c| matches!(&c.edge, Edge::Literal(label) if label == segment));
			let wildcard =
				node.children.iter().find(|c| matches!(&c.edge, Edge::Wildcard(_)));

			node = match literal.or(wildcard) {
				Some(child) => {
					if let Edge::Wildcard(name) = &child.edge {
						params.insert(name.clone(), segment.to_owned());
					}
					child
				}
				None => return None,
			};
		}

		node.handler.as_ref().map(|h| (h, params))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wildcard_binds_value() {
		let mut router = UrlRouter::new();
		router.add_handler("/a/:x/b", "h").unwrap();

		let (h, params) = router.route("/a/hello/b").unwrap();
		assert_eq!(*h, "h");
		assert_eq!(params.get("x"), Some(&"hello".to_owned()));
	}

	#[test]
	fn empty_segment_does_not_match() {
		let mut router = UrlRouter::new();
		router.add_handler("/a/:x/b", "h").unwrap();
		assert!(router.route("/a//b").is_none());
	}

	#[test]
	fn extra_segment_does_not_match() {
		let mut router = UrlRouter::new();
		router.add_handler("/a/:x/b", "h").unwrap();
		assert!(router.route("/a/hello/b/c").is_none());
	}

	#[test]
	fn trailing_slash_tolerated() {
		let mut router = UrlRouter::new();
		router.add_handler("/a/:x/b", "h").unwrap();
		assert!(router.route("/a/hello/b/").is_some());
	}

	#[test]
	fn no_handler_is_none() {
		let mut router: UrlRouter<&str> = UrlRouter::new();
		router.add_handler("/a/:x/b", "h").unwrap();
		assert!(router.route("/a/hello").is_none());
	}

	#[test]
	fn literal_preferred_over_wildcard() {
		let mut router = UrlRouter::new();
		router.add_handler("/users/:user", "wild").unwrap();
		router.add_handler("/users/me", "literal").unwrap();

		let (h, params) = router.route("/users/me").unwrap();
		assert_eq!(*h, "literal");
		assert!(params.is_empty());

		let (h, params) = router.route("/users/bob").unwrap();
		assert_eq!(*h, "wild");
		assert_eq!(params.get("user"), Some(&"bob".to_owned()));
	}

	#[test]
	fn conflicting_wildcard_names_error() {
		let mut router = UrlRouter::new();
		router.add_handler("/users/:user/devices", "h1").unwrap();
		let err = router.add_handler("/users/:id/other", "h2").unwrap_err();
		assert_eq!(err.existing, "user");
		assert_eq!(err.new, "id");
	}

	#[test]
	fn postal_device_routes() {
		let mut router = UrlRouter::new();
		router.add_handler("/v1/users/:user/devices", "list").unwrap();
		router.add_handler("/v1/users/:user/devices/:device", "one").unwrap();
		router.add_handler("/v1/notify", "notify").unwrap();
		router.add_handler("/status", "status").unwrap();

		let (h, params) = router.route("/v1/users/u1/devices/tok").unwrap();
		assert_eq!(*h, "one");
		assert_eq!(params.get("user"), Some(&"u1".to_owned()));
		assert_eq!(params.get("device"), Some(&"tok".to_owned()));

		assert_eq!(router.route("/status").unwrap().0, &"status");
		assert_eq!(router.route("/v1/notify").unwrap().0, &"notify");
	}
}
