//! Reactions: async subscribers invoked by the event dispatcher.
//!
//! A reaction receives its positional arguments as a `Vec<Value>` and
//! answers with `Ok(None)` ("no opinion"), `Ok(Some(value))`, or an error.
//! `Some(Value::Null)` is a defined answer and counts as one.
//!
//! # Field projection
//!
//! A reaction may declare a [`FieldProjection`]. When triggered with
//! `[event, trailing…]` it is then invoked with
//! `[event, event[f1], …, event[fn], trailing…]`, substituting `null` for any
//! field the event lacks.
//!
//! ```
//! use rendezvous_core::reaction::FieldProjection;
//! use serde_json::json;
//!
//! let projection = FieldProjection::new(["a", "b"]);
//! let event = json!({"a": 1, "c": 3});
//!
//! let args = projection.apply(vec![event.clone(), json!("tail")]);
//! assert_eq!(args, vec![event, json!(1), json!(null), json!("tail")]);
//! ```

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Outcome of a single reaction
pub type ReactionResult = anyhow::Result<Option<Value>>;

/// Boxed future returned by [`Reaction::react`]
pub type ReactionFuture<'a> = Pin<Box<dyn Future<Output = ReactionResult> + Send + 'a>>;

/// An async subscriber.
///
/// Uses an explicit boxed future instead of `async fn` so reactions can be
/// stored as `Arc<dyn Reaction>`. Any `Fn(Vec<Value>) -> impl Future` closure
/// is a reaction.
///
/// # Example
///
/// ```
/// use rendezvous_core::reaction::{Reaction, ReactionResult};
/// use serde_json::{json, Value};
///
/// let echo = |args: Vec<Value>| async move { ReactionResult::Ok(args.into_iter().next()) };
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let answer = echo.react(vec![json!("hi")]).await.unwrap();
/// assert_eq!(answer, Some(json!("hi")));
/// # });
/// ```
pub trait Reaction: Send + Sync {
    /// React to a triggered event with the given positional arguments
    fn react(&self, args: Vec<Value>) -> ReactionFuture<'_>;
}

impl<F, Fut> Reaction for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = ReactionResult> + Send + 'static,
{
    fn react(&self, args: Vec<Value>) -> ReactionFuture<'_> {
        Box::pin(self(args))
    }
}

/// Ordered list of event field names forwarded positionally to a reaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldProjection {
    fields: Vec<String>,
}

impl FieldProjection {
    /// Create a projection over the given field names, in order
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Projected field names
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Rewrite `[event, trailing…]` into `[event, projected…, trailing…]`.
    ///
    /// A missing event is treated as `null`; a non-object event projects every
    /// field as `null`.
    #[must_use]
    pub fn apply(&self, args: Vec<Value>) -> Vec<Value> {
        let mut args = args.into_iter();
        let event = args.next().unwrap_or(Value::Null);

        let mut projected = Vec::with_capacity(1 + self.fields.len() + args.len());
        projected.extend(
            self.fields
                .iter()
                .map(|field| event.get(field.as_str()).cloned().unwrap_or(Value::Null)),
        );
        projected.insert(0, event);
        projected.extend(args);
        projected
    }
}

/// A reaction wrapped with a field projection.
pub struct Projected {
    projection: FieldProjection,
    inner: Arc<dyn Reaction>,
}

impl Projected {
    /// Wrap `inner` so it receives projected arguments
    #[must_use]
    pub fn new(projection: FieldProjection, inner: Arc<dyn Reaction>) -> Self {
        Self { projection, inner }
    }

    /// The projection applied before each invocation
    #[must_use]
    pub const fn projection(&self) -> &FieldProjection {
        &self.projection
    }
}

impl Reaction for Projected {
    fn react(&self, args: Vec<Value>) -> ReactionFuture<'_> {
        self.inner.react(self.projection.apply(args))
    }
}

impl std::fmt::Debug for Projected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projected")
            .field("projection", &self.projection)
            .field("inner", &"<Arc<dyn Reaction>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_projection_substitutes_null_for_missing_fields() {
        let projection = FieldProjection::new(["a", "b"]);
        let event = json!({"a": 1, "c": 3});

        let args = projection.apply(vec![event.clone(), json!("tail")]);

        assert_eq!(args, vec![event, json!(1), Value::Null, json!("tail")]);
    }

    #[test]
    fn test_projection_keeps_explicit_nulls() {
        let projection = FieldProjection::new(["a"]);
        let args = projection.apply(vec![json!({"a": null})]);
        assert_eq!(args[1], Value::Null);
    }

    #[test]
    fn test_projection_without_event() {
        let projection = FieldProjection::new(["a", "b"]);
        assert_eq!(
            projection.apply(Vec::new()),
            vec![Value::Null, Value::Null, Value::Null]
        );
    }

    #[test]
    fn test_projection_on_non_object_event() {
        let projection = FieldProjection::new(["len"]);
        let args = projection.apply(vec![json!([1, 2, 3]), json!(7)]);
        assert_eq!(args, vec![json!([1, 2, 3]), Value::Null, json!(7)]);
    }

    #[test]
    fn test_empty_projection_passes_arguments_through() {
        let projection = FieldProjection::default();
        let args = vec![json!({"x": 1}), json!(2)];
        assert_eq!(projection.apply(args.clone()), args);
    }

    #[tokio::test]
    async fn test_projected_reaction_receives_rewritten_arguments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner: Arc<dyn Reaction> = Arc::new(move |args: Vec<Value>| {
            sink.lock().unwrap().push(args);
            async { ReactionResult::Ok(None) }
        });

        let projected = Projected::new(FieldProjection::new(["id"]), inner);
        let result = projected
            .react(vec![json!({"id": "op-1"}), json!("tail")])
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [vec![json!({"id": "op-1"}), json!("op-1"), json!("tail")]]
        );
    }
}
