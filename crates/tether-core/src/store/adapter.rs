//! The adapter seam.
//!
//! Transport lives outside the core. An adapter turns a request into a
//! deferred raw JSON payload; the store normalizes and applies it.

use crate::TetherError;
use futures::future::{self, FutureExt, LocalBoxFuture};
use serde_json::{Map, Value};
use std::rc::Rc;

/// Deferred raw payload.
pub type AdapterFuture = LocalBoxFuture<'static, Result<Value, TetherError>>;

fn unsupported(operation: &'static str) -> AdapterFuture {
    future::ready(Err(TetherError::Adapter(format!(
        "{operation} is not supported by this adapter"
    ))))
    .boxed_local()
}

/// Remote source of truth.
///
/// Futures are `'static`: implementations copy whatever they need out of
/// the arguments before returning.
pub trait Adapter {
    fn find_record(&self, type_name: &str, id: &str) -> AdapterFuture;

    fn find_all(&self, type_name: &str) -> AdapterFuture {
        let _ = type_name;
        unsupported("findAll")
    }

    fn query(&self, type_name: &str, query: &Value) -> AdapterFuture {
        let _ = (type_name, query);
        unsupported("query")
    }

    fn create_record(&self, type_name: &str, body: Map<String, Value>) -> AdapterFuture {
        let _ = (type_name, body);
        unsupported("createRecord")
    }

    fn update_record(&self, type_name: &str, id: &str, body: Map<String, Value>) -> AdapterFuture {
        let _ = (type_name, id, body);
        unsupported("updateRecord")
    }

    fn delete_record(&self, type_name: &str, id: &str) -> AdapterFuture {
        let _ = (type_name, id);
        unsupported("deleteRecord")
    }

    /// Fetch the record behind a belongsTo `related` link.
    fn find_belongs_to(&self, link: &str) -> AdapterFuture {
        let _ = link;
        unsupported("findBelongsTo")
    }

    /// Fetch the records behind a hasMany `related` link.
    fn find_has_many(&self, link: &str) -> AdapterFuture {
        let _ = link;
        unsupported("findHasMany")
    }
}

/// Forwards to the shared adapter.
impl<A: Adapter + ?Sized> Adapter for Rc<A> {
    fn find_record(&self, type_name: &str, id: &str) -> AdapterFuture {
        (**self).find_record(type_name, id)
    }

    fn find_all(&self, type_name: &str) -> AdapterFuture {
        (**self).find_all(type_name)
    }

    fn query(&self, type_name: &str, query: &Value) -> AdapterFuture {
        (**self).query(type_name, query)
    }

    fn create_record(&self, type_name: &str, body: Map<String, Value>) -> AdapterFuture {
        (**self).create_record(type_name, body)
    }

    fn update_record(&self, type_name: &str, id: &str, body: Map<String, Value>) -> AdapterFuture {
        (**self).update_record(type_name, id, body)
    }

    fn delete_record(&self, type_name: &str, id: &str) -> AdapterFuture {
        (**self).delete_record(type_name, id)
    }

    fn find_belongs_to(&self, link: &str) -> AdapterFuture {
        (**self).find_belongs_to(link)
    }

    fn find_has_many(&self, link: &str) -> AdapterFuture {
        (**self).find_has_many(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    struct ReadOnly;

    impl Adapter for ReadOnly {
        fn find_record(&self, _type_name: &str, id: &str) -> AdapterFuture {
            let id = id.to_string();
            async move { Ok(serde_json::json!({ "id": id })) }.boxed_local()
        }
    }

    #[test]
    fn defaults_report_unsupported() {
        let err = block_on(ReadOnly.find_all("post")).expect_err("unsupported");
        assert!(matches!(err, TetherError::Adapter(message) if message.contains("findAll")));
        let found = block_on(ReadOnly.find_record("post", "1")).expect("found");
        assert_eq!(found["id"], "1");
    }
}
