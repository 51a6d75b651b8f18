//! Dispatch table: services and the methods they expose.
//!
//! A service is a value whose type implements [`RpcService`]. Registration
//! lists the callable methods once; after that the table is read-only and
//! shared by every connection.
//!
//! # Method shape
//!
//! ```text
//! fn(&self, args: A, reply: &mut R) -> Result<(), E>
//! ```
//!
//! `A` is decoded from the request body, `R` starts as `R::default()` and is
//! sent back when the method returns `Ok`. An `Err` is sent back as the
//! response's error text.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mrpc_common::codec::{Body, Format};
use mrpc_common::{MrpcError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A type whose methods can be called remotely.
///
/// # Example
///
/// ```
/// use mrpc_server::{Methods, RpcService};
///
/// struct Arith;
///
/// impl Arith {
///     fn add(&self, args: (i64, i64), reply: &mut i64) -> Result<(), String> {
///         *reply = args.0 + args.1;
///         Ok(())
///     }
/// }
///
/// impl RpcService for Arith {
///     fn register_methods(methods: &mut Methods<Self>) {
///         methods.method("Add", Self::add);
///     }
/// }
/// ```
pub trait RpcService: Send + Sync + Sized + 'static {
    fn register_methods(methods: &mut Methods<Self>);
}

/// Decoded argument with its type erased until the method downcasts it.
pub type Argv = Box<dyn Any + Send>;

type DecodeFn = dyn Fn(Format, &[u8]) -> Result<Argv> + Send + Sync;
type InvokeFn = dyn Fn(Argv) -> std::result::Result<Box<dyn Body>, String> + Send + Sync;

/// One callable method of a service.
pub struct MethodType {
    arg_type: &'static str,
    reply_type: &'static str,
    num_calls: AtomicU64,
    decode: Box<DecodeFn>,
    invoke: Box<InvokeFn>,
}

impl MethodType {
    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Number of times the method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Decodes a request body into this method's argument type.
    pub fn decode_argv(&self, format: Format, body: &[u8]) -> Result<Argv> {
        (self.decode)(format, body)
    }

    /// Invokes the method with a decoded argument.
    ///
    /// # Returns
    ///
    /// The reply to send back, or the error text for the response header
    pub fn call(&self, argv: Argv) -> std::result::Result<Box<dyn Body>, String> {
        self.num_calls.fetch_add(1, Ordering::Relaxed);
        (self.invoke)(argv)
    }
}

/// Collects the methods of a service during registration.
pub struct Methods<S> {
    rcvr: Arc<S>,
    service_name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl<S: RpcService> Methods<S> {
    /// Binds `name` to `f`.
    ///
    /// Registering the same name twice keeps the later binding.
    pub fn method<A, R, E, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&S, A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + Sync + 'static,
        E: Display,
    {
        let rcvr = self.rcvr.clone();

        let decode = |format: Format, body: &[u8]| -> Result<Argv> {
            let args: A = format.decode(body)?;
            Ok(Box::new(args))
        };

        let invoke = move |argv: Argv| -> std::result::Result<Box<dyn Body>, String> {
            let args = argv
                .downcast::<A>()
                .map_err(|_| format!("rpc server: argument is not a {}", type_name::<A>()))?;
            let mut reply = R::default();
            f(rcvr.as_ref(), *args, &mut reply).map_err(|e| e.to_string())?;
            Ok(Box::new(reply))
        };

        let method = MethodType {
            arg_type: type_name::<A>(),
            reply_type: type_name::<R>(),
            num_calls: AtomicU64::new(0),
            decode: Box::new(decode),
            invoke: Box::new(invoke),
        };

        tracing::info!("rpc server: register {}.{}", self.service_name, name);
        if self.methods.insert(name.to_string(), Arc::new(method)).is_some() {
            tracing::warn!("rpc server: method {}.{} registered twice", self.service_name, name);
        }
        self
    }
}

/// A registered service and its methods.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    /// Builds the dispatch table for `rcvr`.
    ///
    /// The service is named after its type (last path segment, generics
    /// stripped), which must start with an uppercase ASCII letter.
    pub fn new<S: RpcService>(rcvr: S) -> Result<Self> {
        let name = service_name::<S>();
        if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(MrpcError::InvalidServiceName(name));
        }

        let mut methods = Methods {
            rcvr: Arc::new(rcvr),
            service_name: name,
            methods: HashMap::new(),
        };
        S::register_methods(&mut methods);

        Ok(Self {
            name: methods.service_name,
            methods: methods.methods,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodType>> {
        self.methods.get(name)
    }

    /// Names of the registered methods, in no particular order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

fn service_name<S>() -> String {
    let full = type_name::<S>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
