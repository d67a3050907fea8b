use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject
/// dependencies backed by a freshly seeded in-memory store.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// [`crate::model::store::MemoryStore`] and
/// [`crate::model::gateway::StubGateway`]. The client shares the injected
/// store and gateway, so tests can inspect or script them.
///
/// `#[backend_test(session)]` starts a kiosk session before the test runs;
/// `#[backend_test(verified)]` additionally verifies it with token `ABC123`.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Open (and verify) a session if needed.
    let start_session = quote! {
        let response = rocket_client
            .post(uri!(crate::api::session::start))
            .dispatch()
            .await;
        assert_eq!(rocket::http::Status::Ok, response.status(), "failed to start session");
    };
    let verify_session = quote! {
        let response = rocket_client
            .post(uri!(crate::api::session::submit_token))
            .header(rocket::http::ContentType::JSON)
            .body(rocket::serde::json::json!({ "token": "ABC123" }).to_string())
            .dispatch()
            .await;
        assert_eq!(rocket::http::Status::Ok, response.status(), "failed to verify session");
    };
    let maybe_session = match parse_macro_input!(args as Option<Ident>) {
        Some(arg) if arg == "session" => quote! {{ #start_session }},
        Some(arg) if arg == "verified" => quote! {{ #start_session } { #verify_session }},
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `session` or `verified`")
                .into_compile_error()
                .into();
        }
        None => TokenStream2::new(),
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (
                rocket::local::asynchronous::Client,
                crate::model::store::MemoryStore,
                crate::model::gateway::StubGateway,
            ) {
                log4rs_test_utils::test_logging::init_logging_once_for(
                    ["kiosk_backend"],
                    None,
                    None,
                );

                let store = crate::model::store::MemoryStore::example();
                let gateway = crate::model::gateway::StubGateway::accepting();
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_backends(store.clone(), gateway.clone()),
                )
                .await
                .unwrap();

                #maybe_session

                (rocket_client, store, gateway)
            }

            /// The test itself.
            #item_fn

            // Timers scheduled by the session registry need a live runtime.
            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                #[allow(unused_variables)]
                let (rocket_client, store, gateway) = setup().await;
                #new_name(#(#test_args),*).await;
            });
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen = vec![];
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                // Valid as the last path segment for any type is itself.
                let type_ident = &type_path.path.segments.last().unwrap().ident;
                let injected = if type_ident == "Client" {
                    Some(quote! { rocket_client })
                } else if type_ident == "MemoryStore" {
                    Some(quote! { store.clone() })
                } else if type_ident == "StubGateway" {
                    Some(quote! { gateway.clone() })
                } else {
                    None
                };

                if let Some(injected) = injected {
                    if seen.contains(type_ident) {
                        return Err(syn::Error::new(
                            input.span(),
                            format!("Test cannot accept more than one `{type_ident}`"),
                        ));
                    }
                    seen.push(type_ident.clone());
                    args.push(injected);
                    continue;
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `store_ident: MemoryStore` or `gateway_ident: StubGateway`",
        ));
    }

    Ok(args)
}
