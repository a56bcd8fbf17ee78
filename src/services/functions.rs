// Function Registry - named async handlers invokable from workflow actions
//
// Handlers are registered at startup by name. Invoking an unregistered
// name is a hard failure, never a silent no-op.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type Handler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct FunctionRegistry {
    handlers: HashMap<String, Handler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        self.handlers
            .insert(name.to_string(), Arc::new(move |args| Box::pin(handler(args))));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub async fn call(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        match self.handlers.get(name) {
            Some(handler) => handler(args).await,
            None => Err(format!("no registered function named '{}'", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_registered_function_runs() {
        let mut registry = FunctionRegistry::new();
        registry.register("double", |args| async move {
            let n = args["n"].as_i64().unwrap_or(0);
            Ok(json!({ "result": n * 2 }))
        });

        let out = registry.call("double", json!({ "n": 21 })).await.unwrap();
        assert_eq!(out["result"], 42);
    }

    #[tokio::test]
    async fn test_unknown_function_fails() {
        let registry = FunctionRegistry::new();
        let err = registry.call("missing", json!({})).await.unwrap_err();
        assert!(err.contains("missing"));
    }
}
