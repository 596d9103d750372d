use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, FnArg, GenericArgument, Ident, ItemFn, Pat, PathArguments,
    Signature, Type, TypePath,
};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the database is dropped regardless of how the test terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] (as
/// `Client`), [`mongodb::Database`] (as `Database`), [`mongodb::Client`] (as
/// `mongodb::Client`), and [`crate::model::mongodb::Coll<T>`].
///
/// Given a role (`#[backend_test(voter)]`, `candidate` or `admin`), the
/// example user for that role is registered before the test runs, and their
/// `AuthResponse` can be injected too.
///
/// If no database is reachable, the test fails, unless
/// `BALLOT_BOX_SKIP_DB_TESTS` is set, in which case it is skipped with a
/// message.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);
    let role = parse_macro_input!(args as Option<Ident>);

    let role_variant = match &role {
        None => None,
        Some(role) if role == "voter" => Some(quote! { Voter }),
        Some(role) if role == "candidate" => Some(quote! { Candidate }),
        Some(role) if role == "admin" => Some(quote! { Admin }),
        Some(role) => {
            return syn::Error::new(role.span(), "Expected one of `voter`, `candidate` or `admin`")
                .into_compile_error()
                .into();
        }
    };

    // Extract type information and reject invalid function signatures.
    let (test_args, collection_idents, collection_types) =
        match check_sig(&item_fn.sig, role_variant.is_some()) {
            Ok(args) => args,
            Err(err) => {
                return err.into_compile_error().into();
            }
        };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Register the user for the given role if needed.
    let maybe_register = match role_variant {
        Some(variant) => quote! {
            Some(crate::api::test_util::register_as(
                &rocket_client,
                crate::model::common::role::Role::#variant,
            ).await)
        },
        None => quote! { None },
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup. `None` if there is no database to test against
            /// and skipping was requested.
            async fn setup() -> Option<(
                rocket::local::asynchronous::Client,
                mongodb::Database,
                mongodb::Client,
                Option<crate::model::api::user::AuthResponse>,
            )> {
                // These tests enter handler code, so enable logging.
                log4rs_test_utils::test_logging::init_logging_once_for(["ballot_box"], None, None);

                let db_client = match crate::db_client().await {
                    Ok(db_client) => db_client,
                    Err(err) if crate::db_tests_skippable() => {
                        eprintln!("no database reachable at `db_uri`: {err}");
                        return None;
                    }
                    Err(err) => panic!(
                        "no database reachable at `db_uri` ({err}); set {} to skip",
                        crate::SKIP_DB_TESTS,
                    ),
                };
                let db_name = crate::database();
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_db(db_client.clone(), &db_name).await,
                )
                .await
                .unwrap();
                let db = db_client.database(&db_name);

                let auth = #maybe_register;

                Some((rocket_client, db, db_client, auth))
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(db: mongodb::Database) {
                db.drop(None).await.unwrap();
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let Some((rocket_client, db, db_client, auth)) = outer_runtime.block_on(setup()) else {
                eprintln!("skipping {}", stringify!(#name));
                return;
            };

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let db_mutex = std::sync::Mutex::new(db.clone());
            let db_client_mutex = std::sync::Mutex::new(db_client);
            let auth_mutex = std::sync::Mutex::new(auth);
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                #[allow(unused_variables)]
                let rocket_client = client_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let db = db_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let db_client = db_client_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let auth = auth_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                #(
                    let #collection_idents = crate::model::mongodb::Coll::<#collection_types>::from_db(&db);
                )*

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(db));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::resume_unwind(cause);
            }
        }
    }
    .into()
}

/// Is this the path `mongodb::Client`?
fn is_db_client(type_path: &TypePath) -> bool {
    let segments: Vec<_> = type_path.path.segments.iter().map(|s| &s.ident).collect();
    segments.len() == 2 && segments[0] == "mongodb" && segments[1] == "Client"
}

/// Ensure the wrapped test is async, extract parameters to inject in order,
/// and reject unknown parameters.
#[allow(clippy::type_complexity)]
fn check_sig(
    sig: &Signature,
    has_role: bool,
) -> Result<(Vec<TokenStream2>, Vec<Ident>, Vec<Ident>), syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen: Vec<&'static str> = vec![];
    let mut args = vec![];
    let mut collection_idents = vec![];
    let mut collection_types = vec![];

    // Each of these may be injected at most once.
    let mut take_once = |what: &'static str, span| {
        if seen.contains(&what) {
            Err(syn::Error::new(
                span,
                format!("Test cannot accept more than one `{what}`"),
            ))
        } else {
            seen.push(what);
            Ok(())
        }
    };

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(pat_ident) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.get_ident() {
                        if type_ident == "Client" {
                            take_once("rocket::local::asynchronous::Client", input.span())?;
                            args.push(quote! { rocket_client });
                            continue;
                        } else if type_ident == "Database" {
                            take_once("mongodb::Database", input.span())?;
                            args.push(quote! { db });
                            continue;
                        } else if type_ident == "AuthResponse" {
                            if !has_role {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "`AuthResponse` needs a role, e.g. `#[backend_test(voter)]`",
                                ));
                            }
                            take_once("AuthResponse", input.span())?;
                            args.push(quote! { auth.unwrap() });
                            continue;
                        }
                    } else if is_db_client(type_path) {
                        take_once("mongodb::Client", input.span())?;
                        args.push(quote! { db_client });
                        continue;
                    } else {
                        // Valid as the last path segment for any type is itself
                        let possible_collection = type_path.path.segments.last().unwrap();
                        if possible_collection.ident == "Coll" {
                            if let PathArguments::AngleBracketed(generics) =
                                &possible_collection.arguments
                            {
                                if let Some(GenericArgument::Type(Type::Path(type_path))) =
                                    generics.args.first()
                                {
                                    if let Some(type_ident) = type_path.path.get_ident() {
                                        let ident = pat_ident.ident.clone();
                                        args.push(quote! { #ident });
                                        collection_idents.push(ident);
                                        collection_types.push(type_ident.clone());
                                        continue;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `db_ident: Database`, \
             `db_client_ident: mongodb::Client`, `auth_ident: AuthResponse` \
             or `collection_ident: Coll<T>`",
        ));
    }

    Ok((args, collection_idents, collection_types))
}
