//! Server-side method dispatch table.
//!
//! Method names map to boxed, typed callables built once at bind time;
//! there is no runtime reflection. A handler is any async closure taking a
//! tuple of deserializable positional parameters; the adapter decodes each
//! JSON argument into the declared parameter type before invocation:
//!
//! - `null` passes through into `Option` parameters,
//! - numbers are widened/narrowed by `serde_json`,
//! - strings parse into temporal types through their `Deserialize` impls
//!   (e.g. `chrono` dates from RFC 3339 text),
//! - JSON arrays are rebuilt element-by-element into `Vec<T>`,
//! - missing trailing arguments decode as `null`, so trailing `Option`
//!   parameters act as defaults; a missing required parameter is an
//!   argument-count error raised before the handler runs.
//!
//! Binding the same name twice is a fatal configuration error: silent
//! shadowing of RPC methods is considered a programming error.
//!
//! # Example
//!
//! ```
//! use linerpc::dispatch::DispatchTable;
//!
//! let mut table = DispatchTable::new();
//! table
//!     .bind("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
//!     .unwrap();
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::protocol::{codes, Response};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An invocable handler descriptor: decodes positional JSON arguments and
/// runs the bound function. Errors are returned as text for the `-1`
/// failure response; they never propagate past the dispatch path.
pub trait Callable: Send + Sync + 'static {
    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, std::result::Result<Option<Value>, String>>;
}

/// Positional parameter decoding for handler tuples.
pub trait FromParams: Sized + Send {
    /// Declared parameter count.
    const ARITY: usize;

    /// Decode the argument list, filling missing trailing arguments with
    /// `null`. Fails before invocation on arity or type mismatches.
    fn from_params(args: Vec<Value>) -> std::result::Result<Self, String>;
}

fn decode_arg<T: DeserializeOwned>(
    args: &mut Vec<Value>,
    index: usize,
    provided: usize,
    arity: usize,
) -> std::result::Result<T, String> {
    let value = if index < args.len() {
        std::mem::take(&mut args[index])
    } else {
        Value::Null
    };
    serde_json::from_value(value).map_err(|e| {
        if index >= provided {
            format!("argument count mismatch (expected at least {}, got {provided})", index + 1)
        } else {
            format!("invalid argument {} of {arity}: {e}", index + 1)
        }
    })
}

macro_rules! impl_from_params {
    ($arity:expr $(, $t:ident : $idx:tt)*) => {
        impl<$($t,)*> FromParams for ($($t,)*)
        where
            $($t: DeserializeOwned + Send,)*
        {
            const ARITY: usize = $arity;

            #[allow(unused_mut, unused_variables)]
            fn from_params(mut args: Vec<Value>) -> std::result::Result<Self, String> {
                let provided = args.len();
                if provided > $arity {
                    return Err(format!(
                        "argument count mismatch (expected at most {}, got {provided})",
                        $arity
                    ));
                }
                Ok(($(decode_arg::<$t>(&mut args, $idx, provided, $arity)?,)*))
            }
        }
    };
}

impl_from_params!(0);
impl_from_params!(1, A: 0);
impl_from_params!(2, A: 0, B: 1);
impl_from_params!(3, A: 0, B: 1, C: 2);
impl_from_params!(4, A: 0, B: 1, C: 2, D: 3);
impl_from_params!(5, A: 0, B: 1, C: 2, D: 3, E: 4);

/// Adapter wrapping a typed async closure as a [`Callable`].
struct TypedCallable<F, P, Fut> {
    handler: F,
    _marker: PhantomData<fn(P) -> Fut>,
}

impl<F, P, R, Fut> Callable for TypedCallable<F, P, Fut>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    P: FromParams + 'static,
    R: Serialize + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, std::result::Result<Option<Value>, String>> {
        let params = match P::from_params(args) {
            Ok(p) => p,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = (self.handler)(params);
        Box::pin(async move {
            let value = serde_json::to_value(fut.await.map_err(|e| e.to_string())?)
                .map_err(|e| e.to_string())?;
            // A JSON-null return serializes as a void success: the wire
            // response carries no `result` field at all.
            Ok(match value {
                Value::Null => None,
                other => Some(other),
            })
        })
    }
}

/// Concurrent-read map from method name to handler descriptor.
///
/// Built mutably at bind time, then frozen behind an `Arc` for the
/// lifetime of the server; registration is immutable thereafter.
pub struct DispatchTable {
    methods: HashMap<String, Box<dyn Callable>>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Bind a handler under `name`.
    ///
    /// Fails with [`RpcError::Config`] if the name is already taken.
    pub fn bind<F, P, R, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        P: FromParams + 'static,
        R: Serialize + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        if self.methods.contains_key(name) {
            return Err(RpcError::Config(format!(
                "the method '{name}' is already bound"
            )));
        }
        self.methods.insert(
            name.to_string(),
            Box::new(TypedCallable {
                handler,
                _marker: PhantomData,
            }),
        );
        tracing::debug!(method = name, "handler bound");
        Ok(())
    }

    /// Bind a handler under `prefix + name`, grouping related methods.
    ///
    /// The prefix must not contain whitespace.
    pub fn bind_with_prefix<F, P, R, Fut>(
        &mut self,
        prefix: &str,
        name: &str,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        P: FromParams + 'static,
        R: Serialize + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        if prefix.chars().any(char::is_whitespace) {
            return Err(RpcError::Config(
                "prefix string can not contain any whitespace".into(),
            ));
        }
        self.bind(&format!("{prefix}{name}"), handler)
    }

    /// True if `name` has a bound handler.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Number of bound methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if no methods are bound.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Route one request to its handler.
    ///
    /// Returns the response to write, or `None` when the request was a
    /// notification (`id` absent); notifications never produce output,
    /// regardless of success or failure.
    pub async fn dispatch(
        &self,
        id: Option<u64>,
        method: &str,
        args: Vec<Value>,
    ) -> Option<Response> {
        let callable = match self.methods.get(method) {
            Some(c) => c,
            None => {
                return match id {
                    Some(id) => Some(Response::failure(
                        id,
                        codes::METHOD_NOT_FOUND,
                        format!("Unknown method '{method}'"),
                    )),
                    None => {
                        tracing::debug!(method, "notification for unknown method ignored");
                        None
                    }
                };
            }
        };

        match callable.invoke(args).await {
            Ok(result) => id.map(|id| Response::success(id, result)),
            Err(message) => {
                tracing::debug!(method, %message, "handler failed");
                id.map(|id| {
                    Response::failure(
                        id,
                        codes::HANDLER_ERROR,
                        format!("Handler '{method}' failed: {message}"),
                    )
                })
            }
        }
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}
