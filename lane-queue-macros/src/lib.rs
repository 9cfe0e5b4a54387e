//! Procedural macros for lane-queue
//!
//! This crate provides the `#[lane_queue::test]` attribute macro, which hands
//! a test its own queue and drains that queue once the test body returns.
//!
//! # Example
//!
//! ```rust,ignore
//! use lane_queue::prelude::*;
//!
//! #[lane_queue::test(virtual_time = true)]
//! fn my_test(queue: AsyncQueue, executor: TestExecutor) {
//!     queue.schedule_delayed(Duration::from_secs(10), TimerId::Heartbeat, || {}).unwrap();
//!     executor.advance_by(Duration::from_secs(10));
//!     assert_eq!(queue.delayed_count(), 0);
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, FnArg, Ident, ItemFn, Lit, Pat, ReturnType, Token, Type,
};

/// Configuration options for the test macro.
struct TestConfig {
    /// Run the queue on a `TestExecutor` with a mock clock (default: false)
    virtual_time: bool,
    /// Fire pending delayed operations when draining at teardown (default: true)
    drain_delayed: bool,
    /// Diagnostic name of the lane (default: "worker")
    name: Option<String>,
    /// Initial virtual time in seconds, only with `virtual_time = true`
    start_time_secs: Option<u64>,
    /// Flavor for the tokio runtime of async tests
    flavor: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            virtual_time: false,
            drain_delayed: true,
            name: None,
            start_time_secs: None,
            flavor: None,
        }
    }
}

impl Parse for TestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = TestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let lit: Lit = input.parse()?;

            match (ident.to_string().as_str(), lit) {
                ("virtual_time", Lit::Bool(b)) => config.virtual_time = b.value(),
                ("drain_delayed", Lit::Bool(b)) => config.drain_delayed = b.value(),
                ("name", Lit::Str(s)) => config.name = Some(s.value()),
                ("start_time", Lit::Int(i)) => config.start_time_secs = Some(i.base10_parse()?),
                ("flavor", Lit::Str(s)) => config.flavor = Some(s.value()),
                ("virtual_time" | "drain_delayed" | "name" | "start_time" | "flavor", lit) => {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("unexpected value for `{ident}`"),
                    ));
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

/// What the macro injects for a test parameter.
#[derive(Debug, PartialEq, Eq)]
enum Injected {
    Queue,
    Executor,
}

/// Classifies a parameter by the last segment of its type.
fn injected_kind(arg: &FnArg) -> Option<Injected> {
    let FnArg::Typed(pat_type) = arg else {
        return None;
    };
    let Type::Path(type_path) = &*pat_type.ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident == "AsyncQueue" {
        Some(Injected::Queue)
    } else if segment.ident == "TestExecutor" {
        Some(Injected::Executor)
    } else {
        None
    }
}

/// Extracts the parameter pattern from a function argument.
fn get_param_pat(arg: &FnArg) -> Option<&Pat> {
    if let FnArg::Typed(pat_type) = arg {
        Some(&pat_type.pat)
    } else {
        None
    }
}

/// Test attribute macro that runs a test against its own queue.
///
/// The queue is drained after the body returns, so work the test submitted
/// has run (and panicked, if it was going to) before the test ends.
///
/// # Basic Usage
///
/// ```rust,ignore
/// use lane_queue::AsyncQueue;
///
/// #[lane_queue::test]
/// fn test_basic(queue: AsyncQueue) {
///     queue.enqueue(|| println!("on the worker lane")).unwrap();
/// }
/// ```
///
/// # Virtual Time
///
/// With `virtual_time = true` the queue runs on a `TestExecutor`. Add a
/// `TestExecutor` parameter to step it and advance its clock:
///
/// ```rust,ignore
/// use lane_queue::prelude::*;
/// use std::time::Duration;
///
/// #[lane_queue::test(virtual_time = true, drain_delayed = false)]
/// fn test_backoff(queue: AsyncQueue, executor: TestExecutor) {
///     let op = queue
///         .schedule_delayed(Duration::from_secs(5), TimerId::RetryTransaction, || {})
///         .unwrap();
///     executor.advance_by(Duration::from_secs(5));
///     assert_eq!(op.state(), DelayedState::Fired);
/// }
/// ```
///
/// # Configuration Options
///
/// - `virtual_time = true` - Use a `TestExecutor` with a mock clock
/// - `drain_delayed = false` - Leave pending delayed operations at teardown
/// - `name = "user"` - Diagnostic name of the lane (default: `"worker"`)
/// - `start_time = 100` - Initial virtual time in seconds
/// - `flavor = "multi_thread"` - Tokio runtime flavor for `async fn` tests
///
/// `async fn` tests run on tokio, which must be a dev-dependency.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as TestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_test(&config, &input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_test(config: &TestConfig, input: &ItemFn) -> syn::Result<TokenStream2> {
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;
    let is_async = input.sig.asyncness.is_some();

    if !config.virtual_time && config.start_time_secs.is_some() {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "`start_time` requires `virtual_time = true`",
        ));
    }
    if !is_async && config.flavor.is_some() {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "`flavor` only applies to async test functions",
        ));
    }

    // Bind every parameter to the queue or its executor
    let mut bindings = Vec::new();
    for arg in &input.sig.inputs {
        let pat = get_param_pat(arg);
        match (injected_kind(arg), pat) {
            (Some(Injected::Queue), Some(pat)) => {
                bindings.push(quote! { let #pat = __lane_queue.clone(); });
            }
            (Some(Injected::Executor), Some(pat)) => {
                if !config.virtual_time {
                    return Err(syn::Error::new_spanned(
                        arg,
                        "a `TestExecutor` parameter requires `virtual_time = true`",
                    ));
                }
                bindings.push(quote! { let #pat = __lane_queue_executor.clone(); });
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    arg,
                    "test parameters must be `AsyncQueue` or `TestExecutor`",
                ));
            }
        }
    }

    // Generate queue initialization
    let lane_name = config.name.as_deref().unwrap_or("worker");
    let queue_init = if config.virtual_time {
        let start_time = config.start_time_secs.unwrap_or(0);
        quote! {
            let __lane_queue_executor = ::lane_queue::executor::TestExecutor::with_clock(
                #lane_name,
                ::lane_queue::clock::MockClock::with_start_time(
                    ::std::time::Duration::from_secs(#start_time)
                ),
            );
            let __lane_queue = ::lane_queue::AsyncQueue::new(__lane_queue_executor.clone());
        }
    } else {
        quote! {
            let __lane_queue = ::lane_queue::testing::async_queue_for(
                ::lane_queue::testing::executor_for_testing(#lane_name)
                    .expect("failed to start the test lane"),
            );
        }
    };

    let ret = match &input.sig.output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };
    let drain_delayed = config.drain_delayed;

    let wrapper = if is_async {
        let test_attr = match config.flavor.as_deref() {
            Some("multi_thread") => quote! { #[::tokio::test(flavor = "multi_thread")] },
            None | Some("current_thread") => quote! { #[::tokio::test] },
            Some(other) => {
                return Err(syn::Error::new(
                    proc_macro2::Span::call_site(),
                    format!(
                        "unsupported flavor: {other}. Use \"current_thread\" or \"multi_thread\""
                    ),
                ));
            }
        };
        quote! {
            #test_attr
            #(#attrs)*
            #vis async fn #name() -> #ret {
                #queue_init
                let __lane_queue_result: #ret = {
                    #(#bindings)*
                    async #body.await
                };
                __lane_queue.drain(#drain_delayed);
                __lane_queue_result
            }
        }
    } else {
        quote! {
            #[::core::prelude::v1::test]
            #(#attrs)*
            #vis fn #name() -> #ret {
                #queue_init
                let __lane_queue_result: #ret = {
                    #(#bindings)*
                    (|| -> #ret #body)()
                };
                __lane_queue.drain(#drain_delayed);
                __lane_queue_result
            }
        }
    };

    Ok(wrapper)
}

#[cfg(test)]
mod tests {
    use super::{expand_test, injected_kind, Injected, TestConfig};

    #[::core::prelude::v1::test]
    fn test_config_parse_empty() {
        let config: TestConfig = syn::parse_str("").unwrap();
        assert!(!config.virtual_time);
        assert!(config.drain_delayed);
        assert!(config.name.is_none());
        assert!(config.start_time_secs.is_none());
    }

    #[::core::prelude::v1::test]
    fn test_config_parse_multiple() {
        let config: TestConfig =
            syn::parse_str("virtual_time = true, drain_delayed = false, name = \"user\", start_time = 100")
                .unwrap();
        assert!(config.virtual_time);
        assert!(!config.drain_delayed);
        assert_eq!(config.name.as_deref(), Some("user"));
        assert_eq!(config.start_time_secs, Some(100));
    }

    #[::core::prelude::v1::test]
    fn test_config_rejects_unknown_and_mistyped() {
        assert!(syn::parse_str::<TestConfig>("runtime = \"smol\"").is_err());
        assert!(syn::parse_str::<TestConfig>("virtual_time = \"yes\"").is_err());
    }

    #[::core::prelude::v1::test]
    fn test_injected_kind() {
        let queue: syn::FnArg = syn::parse_str("queue: lane_queue::AsyncQueue").unwrap();
        let executor: syn::FnArg = syn::parse_str("executor: TestExecutor").unwrap();
        let other: syn::FnArg = syn::parse_str("n: u32").unwrap();
        assert_eq!(injected_kind(&queue), Some(Injected::Queue));
        assert_eq!(injected_kind(&executor), Some(Injected::Executor));
        assert_eq!(injected_kind(&other), None);
    }

    #[::core::prelude::v1::test]
    fn test_executor_param_needs_virtual_time() {
        let input: syn::ItemFn = syn::parse_str("fn t(executor: TestExecutor) {}").unwrap();
        let err = expand_test(&TestConfig::default(), &input).unwrap_err();
        assert!(err.to_string().contains("virtual_time = true"));

        let config: TestConfig = syn::parse_str("virtual_time = true").unwrap();
        assert!(expand_test(&config, &input).is_ok());
    }

    #[::core::prelude::v1::test]
    fn test_start_time_needs_virtual_time() {
        let input: syn::ItemFn = syn::parse_str("fn t() {}").unwrap();
        let config: TestConfig = syn::parse_str("start_time = 5").unwrap();
        assert!(expand_test(&config, &input).is_err());
    }
}
