use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;

use crate::error::AppError;
use crate::logging::{LogContext, PerfCounter};
use crate::models::ModelDefinition;

/// API exposure kind of a registered method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Operates on the model as a whole; no ids.
    Model,
    /// First semantic argument is a non-empty list of record ids.
    Record,
    /// Model method whose mapping arguments are field-validated first.
    ModelCreate,
    /// Never exposed over RPC.
    Private,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Record => "record",
            Self::ModelCreate => "model_create",
            Self::Private => "private",
        }
    }
}

/// Invocation context assembled per call: request identity, caller
/// authentication, the merged context mapping and the request's perf
/// counter.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub request_id: String,
    pub db_name: Option<String>,
    pub user_id: i64,
    pub groups: Vec<String>,
    pub context: Map<String, Value>,
    pub kwargs: Map<String, Value>,
    pub perf: Option<Arc<PerfCounter>>,
}

impl CallContext {
    pub fn log_context(&self) -> LogContext {
        let mut metadata = Map::new();
        if !self.request_id.is_empty() {
            metadata.insert("request_id".to_string(), Value::String(self.request_id.clone()));
        }
        if self.user_id != 0 {
            metadata.insert("user_id".to_string(), Value::from(self.user_id));
        }
        LogContext {
            db_name: self.db_name.clone(),
            perf: self.perf.clone(),
            metadata,
        }
    }
}

pub type MethodResult = Result<Value, AppError>;

/// Handler for model-scoped kinds (model, model_create, private):
/// (context, positional args).
pub type ModelHandlerFn =
    Arc<dyn Fn(CallContext, Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// Handler for record-scoped methods: (context, ids, positional args).
pub type RecordHandlerFn =
    Arc<dyn Fn(CallContext, Vec<i64>, Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// Tagged handler shapes; registration accepts exactly one of these and the
/// dispatcher matches on the method kind.
#[derive(Clone)]
pub enum Handler {
    Model(ModelHandlerFn),
    Record(RecordHandlerFn),
}

/// Wrap a plain async function as a model-shaped handler.
pub fn model_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    Handler::Model(Arc::new(move |ctx, args| Box::pin(f(ctx, args))))
}

/// Wrap a plain async function as a record-shaped handler.
pub fn record_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext, Vec<i64>, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    Handler::Record(Arc::new(move |ctx, ids, args| Box::pin(f(ctx, ids, args))))
}

/// A registered method and its metadata. Immutable after registration.
#[derive(Clone)]
pub struct ApiMethod {
    pub model: String,
    pub name: String,
    pub kind: MethodKind,
    pub public: bool,
    pub constrains: Vec<String>,
    pub depends: Vec<String>,
    pub on_change: Vec<String>,
    pub returns: Option<String>,
    pub groups: Vec<String>,
    pub context: Map<String, Value>,
    pub help: String,
    pub(crate) handler: Handler,
    pub model_def: Option<Arc<ModelDefinition>>,
}

impl ApiMethod {
    pub(crate) fn new(model: &str, name: &str, handler: Handler) -> Self {
        // Kind follows the handler shape until a decorator overrides it.
        let kind = match &handler {
            Handler::Model(_) => MethodKind::Model,
            Handler::Record(_) => MethodKind::Record,
        };

        Self {
            model: model.to_string(),
            name: name.to_string(),
            kind,
            public: true,
            constrains: Vec::new(),
            depends: Vec::new(),
            on_change: Vec::new(),
            returns: None,
            groups: Vec::new(),
            context: Map::new(),
            help: String::new(),
            handler,
            model_def: None,
        }
    }

    /// Serialisable metadata view used by the introspection endpoints.
    pub fn metadata(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.kind.as_str(),
            "public": self.public,
            "help": self.help,
            "constrains": self.constrains,
            "depends": self.depends,
            "onchange": self.on_change,
            "returns": self.returns,
            "groups": self.groups,
            "context": self.context,
        })
    }
}

/// Chainable method declaration. Decorators are idempotent and can be
/// applied in any order; `register()` commits the method.
pub struct MethodBuilder<'r> {
    pub(crate) registry: &'r super::registry::ApiRegistry,
    pub(crate) method: ApiMethod,
}

impl<'r> MethodBuilder<'r> {
    /// Mark as a model-level method.
    pub fn model(mut self) -> Self {
        if matches!(self.method.handler, Handler::Model(_)) {
            self.method.kind = MethodKind::Model;
            self.method.public = true;
        }
        self
    }

    /// Mark as a create method: mapping arguments are validated against the
    /// model's field definitions before invocation.
    pub fn model_create(mut self) -> Self {
        if matches!(self.method.handler, Handler::Model(_)) {
            self.method.kind = MethodKind::ModelCreate;
            self.method.public = true;
        }
        self
    }

    /// Exclude from RPC exposure.
    pub fn private(mut self) -> Self {
        if matches!(self.method.handler, Handler::Model(_)) {
            self.method.kind = MethodKind::Private;
        }
        self.method.public = false;
        self
    }

    /// Record field names whose mutations validate through this method.
    pub fn constrains(mut self, fields: &[&str]) -> Self {
        self.method.constrains = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Computed-field dependencies.
    pub fn depends(mut self, fields: &[&str]) -> Self {
        self.method.depends = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// UI-level field-trigger list.
    pub fn on_change(mut self, fields: &[&str]) -> Self {
        self.method.on_change = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Declared return-model tag.
    pub fn returns(mut self, model: &str) -> Self {
        self.method.returns = Some(model.to_string());
        self
    }

    /// The caller must belong to at least one of these groups.
    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.method.groups = groups.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Ambient context merged in before invocation.
    pub fn context(mut self, ctx: Map<String, Value>) -> Self {
        for (key, value) in ctx {
            self.method.context.insert(key, value);
        }
        self
    }

    /// Operator-facing description.
    pub fn help(mut self, help: &str) -> Self {
        self.method.help = help.to_string();
        self
    }

    /// Commit the method under `(model, method)`.
    pub fn register(self) -> Arc<ApiMethod> {
        self.registry.commit(self.method)
    }
}
