use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::call::{ApiCall, ApiResponse};
use super::method::{ApiMethod, CallContext, Handler, MethodBuilder, MethodKind};
use crate::logging::{Logger, LoggerRegistry};
use crate::models::ModelDefinition;

/// Method registry and dispatcher.
///
/// Populated at composition time through [`MethodBuilder`] and thereafter
/// effectively read-only; dispatch resolves `(model, method)`, applies the
/// exposure and group gates, runs create-validation where applicable and
/// translates the handler outcome into the response envelope.
pub struct ApiRegistry {
    methods: RwLock<HashMap<String, HashMap<String, Arc<ApiMethod>>>>,
    models: RwLock<HashMap<String, Arc<ModelDefinition>>>,
    logger: Logger,
}

impl ApiRegistry {
    pub fn new(logging: &LoggerRegistry) -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
            models: RwLock::new(HashMap::new()),
            logger: logging.logger("goodoo.api.registry"),
        }
    }

    /// Register a model definition for create-validation and introspection.
    pub fn register_model(&self, definition: ModelDefinition) -> Arc<ModelDefinition> {
        let definition = Arc::new(definition);
        self.models
            .write()
            .expect("model registry poisoned")
            .insert(definition.name.clone(), definition.clone());
        definition
    }

    pub fn model(&self, name: &str) -> Option<Arc<ModelDefinition>> {
        self.models
            .read()
            .expect("model registry poisoned")
            .get(name)
            .cloned()
    }

    /// Start declaring a method. The builder picks up the model definition
    /// when one is registered under the model name.
    pub fn new_method(&self, model: &str, name: &str, handler: Handler) -> MethodBuilder<'_> {
        let mut method = ApiMethod::new(model, name, handler);
        method.model_def = self.model(model);
        MethodBuilder {
            registry: self,
            method,
        }
    }

    /// Commit a built method. Duplicate registration overwrites the previous
    /// entry; that is logged as a warning for observability.
    pub(crate) fn commit(&self, method: ApiMethod) -> Arc<ApiMethod> {
        let method = Arc::new(method);
        let mut methods = self.methods.write().expect("method registry poisoned");
        let model_methods = methods.entry(method.model.clone()).or_default();

        if model_methods.contains_key(&method.name) {
            self.logger.warning(format!(
                "method {}.{} registered twice, last registration wins",
                method.model, method.name
            ));
        } else {
            self.logger
                .info(format!("Registered API method: {}.{}", method.model, method.name));
        }

        model_methods.insert(method.name.clone(), method.clone());
        method
    }

    pub fn method(&self, model: &str, name: &str) -> Option<Arc<ApiMethod>> {
        self.methods
            .read()
            .expect("method registry poisoned")
            .get(model)
            .and_then(|methods| methods.get(name))
            .cloned()
    }

    /// Metadata for every public method of a model, keyed by method name.
    /// `None` when the model has no registered methods at all.
    pub fn public_methods(&self, model: &str) -> Option<BTreeMap<String, Value>> {
        let methods = self.methods.read().expect("method registry poisoned");
        let model_methods = methods.get(model)?;

        Some(
            model_methods
                .values()
                .filter(|method| method.public)
                .map(|method| (method.name.clone(), method.metadata()))
                .collect(),
        )
    }

    pub fn method_info(&self, model: &str, name: &str) -> Option<Value> {
        self.method(model, name).map(|method| method.metadata())
    }

    /// Execute one RPC call against the registry.
    pub async fn execute_call(&self, base: &CallContext, call: &ApiCall) -> ApiResponse {
        let Some(model_methods) = self
            .methods
            .read()
            .expect("method registry poisoned")
            .get(&call.model)
            .cloned()
        else {
            return ApiResponse::err(format!("Model '{}' not found", call.model));
        };

        let Some(method) = model_methods.get(&call.method).cloned() else {
            return ApiResponse::err(format!(
                "Method '{}' not found on model '{}'",
                call.method, call.model
            ));
        };

        if !method.public {
            return ApiResponse::err("Method is not accessible via RPC");
        }

        if let Err(response) = check_groups(&method, base) {
            return response;
        }

        let ctx = prepare_context(base, call, &method);
        let log_ctx = ctx.log_context();

        let outcome = match method.kind {
            MethodKind::Model | MethodKind::Private => {
                invoke_model(&method, ctx, call.args.clone()).await
            }
            MethodKind::ModelCreate => {
                if let Err(response) = validate_create_args(&method, call) {
                    return response;
                }
                invoke_model(&method, ctx, call.args.clone()).await
            }
            MethodKind::Record => {
                if call.ids.is_empty() {
                    return ApiResponse::err("record method requires IDs");
                }
                invoke_record(&method, ctx, call.ids.clone(), call.args.clone()).await
            }
        };

        match outcome {
            Ok(result) => {
                self.logger.debug_ctx(
                    &log_ctx,
                    format!("{}.{} executed successfully", call.model, call.method),
                );
                ApiResponse::ok(result)
            }
            Err(err) => {
                self.logger.error_ctx(
                    &log_ctx,
                    format!("{}.{} failed: {}", call.model, call.method, err),
                );
                ApiResponse::err(err.to_string())
            }
        }
    }
}

/// Strict group gate: a gated method requires an authenticated caller whose
/// groups intersect the method's groups.
fn check_groups(method: &ApiMethod, ctx: &CallContext) -> Result<(), ApiResponse> {
    if method.groups.is_empty() {
        return Ok(());
    }

    if ctx.user_id == 0 {
        return Err(ApiResponse::err("Access denied: authentication required"));
    }

    let allowed = method
        .groups
        .iter()
        .any(|required| ctx.groups.iter().any(|held| held == required));
    if !allowed {
        return Err(ApiResponse::err(format!(
            "Access denied: requires one of groups {:?}",
            method.groups
        )));
    }

    Ok(())
}

/// Invocation context: request context, overlaid with the method's ambient
/// context, overlaid with the call context.
fn prepare_context(base: &CallContext, call: &ApiCall, method: &ApiMethod) -> CallContext {
    let mut ctx = base.clone();
    for (key, value) in &method.context {
        ctx.context.insert(key.clone(), value.clone());
    }
    for (key, value) in &call.context {
        ctx.context.insert(key.clone(), value.clone());
    }
    ctx.kwargs = call.kwargs.clone();
    ctx
}

/// Validate each mapping-shaped positional argument against the model's
/// field definitions; the first failure short-circuits the call.
fn validate_create_args(method: &ApiMethod, call: &ApiCall) -> Result<(), ApiResponse> {
    if call.args.is_empty() {
        return Err(ApiResponse::err("create method requires data"));
    }

    let Some(model_def) = &method.model_def else {
        return Ok(());
    };

    for arg in &call.args {
        if let Value::Object(values) = arg {
            if let Err(err) = model_def.validate_values(values) {
                return Err(ApiResponse::err(format!("validation failed: {}", err)));
            }
        }
    }
    Ok(())
}

async fn invoke_model(
    method: &ApiMethod,
    ctx: CallContext,
    args: Vec<Value>,
) -> super::method::MethodResult {
    match &method.handler {
        Handler::Model(handler) => handler(ctx, args).await,
        Handler::Record(_) => Err(crate::error::AppError::Internal(format!(
            "method {}.{} is registered with a record handler",
            method.model, method.name
        ))),
    }
}

async fn invoke_record(
    method: &ApiMethod,
    ctx: CallContext,
    ids: Vec<i64>,
    args: Vec<Value>,
) -> super::method::MethodResult {
    match &method.handler {
        Handler::Record(handler) => handler(ctx, ids, args).await,
        Handler::Model(_) => Err(crate::error::AppError::Internal(format!(
            "method {}.{} is registered with a model handler",
            method.model, method.name
        ))),
    }
}

/// Snapshot of every registered model and its public method count; used by
/// the health surface.
pub fn registry_summary(registry: &ApiRegistry) -> Value {
    let methods = registry.methods.read().expect("method registry poisoned");
    let summary: BTreeMap<String, usize> = methods
        .iter()
        .map(|(model, model_methods)| {
            (
                model.clone(),
                model_methods.values().filter(|m| m.public).count(),
            )
        })
        .collect();
    json!(summary)
}
