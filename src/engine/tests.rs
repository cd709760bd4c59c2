use super::*;
use crate::metadata::overlay;
use crate::resolver::lower_sources;
use crate::route_tree::{HandlerRef, HttpMethod};
use pretty_assertions::assert_eq;

const KITE_CONFIG: &str = r#"
routerDefinitions:
  - type: kite::Router
    endpointMethods: [get, post, put, delete, patch]
    groupMethods: [group, route]
    middlewareWrapperMethods: [with]
securityPatterns:
  - calleePath: verify_api_key
    schemeName: ApiKeyAuth
  - calleePath: jwt::decode
    schemeName: BearerAuth
"#;

fn analyze_with(config: &Config, source: &str) -> (Program, Analysis) {
    let program = lower_sources(&[("src/main.rs", source)]);
    let catalog = RouterCatalog::resolve(&config.router_definitions, &program).unwrap();
    let analysis = Analyzer::new(&program, &catalog, config).analyze();
    (program, analysis)
}

fn analyze(source: &str) -> (Program, Analysis) {
    let config = Config::from_yaml(KITE_CONFIG).unwrap();
    analyze_with(&config, source)
}

fn routes(analysis: &Analysis) -> Vec<(HttpMethod, String)> {
    analysis
        .tree
        .operations()
        .into_iter()
        .map(|(_, op)| (op.http_method, op.full_path.clone()))
        .collect()
}

#[test]
fn test_nested_groups_variables_and_closures() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        fn main() {
            let r = Router::new();
            r.get("/health", health);
            let api = r.group("/api");
            let v1 = api.group("/v1");
            v1.get("/users/{id}", get_user);
            api.route("/admin", |admin| {
                admin.post("/reset", reset);
            });
        }
        fn health() {}
        fn get_user() {}
        fn reset() {}
        "#,
    );
    assert_eq!(
        routes(&analysis),
        vec![
            (HttpMethod::Get, "/health".to_string()),
            (HttpMethod::Get, "/api/v1/users/{id}".to_string()),
            (HttpMethod::Post, "/api/admin/reset".to_string()),
        ]
    );
    let (_, op) = analysis.tree.operations()[1];
    assert_eq!(op.path_parameters.len(), 1);
    assert_eq!(op.path_parameters[0].name, "id");
    assert!(analysis.diagnostics.is_empty());
}

#[test]
fn test_helper_called_twice_registers_once() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        fn mount(r: &Router) {
            r.get("/ping", ping);
        }
        fn main() {
            let r = Router::new();
            mount(&r);
            mount(&r);
        }
        fn ping() {}
        "#,
    );
    assert_eq!(routes(&analysis), vec![(HttpMethod::Get, "/ping".to_string())]);
}

#[test]
fn test_return_flow_and_recursive_helper_terminate() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        fn build() -> Router {
            let r = Router::new();
            r.get("/a", a);
            r
        }
        fn nest(r: &Router) {
            let sub = r.group("/x");
            sub.get("/leaf", a);
            nest(&sub);
        }
        fn main() {
            let app = build();
            app.post("/b", b);
            nest(&app);
        }
        fn a() {}
        fn b() {}
        "#,
    );
    assert_eq!(
        routes(&analysis),
        vec![
            (HttpMethod::Get, "/a".to_string()),
            (HttpMethod::Post, "/b".to_string()),
            (HttpMethod::Get, "/x/leaf".to_string()),
        ]
    );
    assert_eq!(analysis.diagnostics.len(), 1);
    assert_eq!(
        analysis.diagnostics[0].kind,
        DiagnosticKind::RecursiveDerivation
    );
}

#[test]
fn test_middleware_security_is_joint() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        fn api_key_auth(req: Request) {
            verify_api_key(&req);
        }
        fn jwt_auth(req: Request) {
            let claims = jwt::decode(req.token());
        }
        fn main() {
            let r = Router::new();
            let a = r.with(api_key_auth);
            let b = a.with(jwt_auth);
            b.get("/secure", secure);
            r.get("/open", open);
        }
        fn secure() {}
        fn open() {}
        "#,
    );
    let resolved: Vec<(String, Vec<String>)> = analysis
        .tree
        .operations()
        .into_iter()
        .map(|(scope, op)| {
            let meta = overlay::resolve(&analysis.tree, scope, op);
            (op.full_path.clone(), meta.security)
        })
        .collect();
    assert_eq!(
        resolved,
        vec![
            ("/open".to_string(), vec![]),
            (
                "/secure".to_string(),
                vec!["ApiKeyAuth".to_string(), "BearerAuth".to_string()]
            ),
        ]
    );
}

#[test]
fn test_chainable_builder_with_method_routers() {
    let config = Config::default();
    let (program, analysis) = analyze_with(
        &config,
        r#"
        use axum::{Router, routing::{get, post}};
        fn app() -> Router {
            Router::new()
                .route("/users", get(list_users).post(create_user))
                .route("/users/:id", get(describe(get_user).tag("users").into_handler()))
                .route("/status", get(|| async { "ok" }))
        }
        async fn list_users() {}
        async fn create_user() {}
        async fn get_user() {}
        "#,
    );
    assert_eq!(
        routes(&analysis),
        vec![
            (HttpMethod::Get, "/users".to_string()),
            (HttpMethod::Post, "/users".to_string()),
            (HttpMethod::Get, "/users/:id".to_string()),
            (HttpMethod::Get, "/status".to_string()),
        ]
    );
    let operations = analysis.tree.operations();
    let (_, get_user) = operations[2];
    assert_eq!(get_user.handler_name, "get_user");
    assert_eq!(
        get_user.explicit_metadata.as_ref().unwrap().tags,
        vec!["users".to_string()]
    );
    let (_, status) = operations[3];
    assert_eq!(status.handler_name, "get_status");
    assert!(matches!(
        status.handler,
        HandlerRef::Closure(e) if matches!(program.kind(e), ExprKind::Closure { .. })
    ));
}

#[test]
fn test_extension_method_receives_router_as_self() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        trait UserRoutes {
            fn user_routes(&self);
        }
        impl UserRoutes for Router {
            fn user_routes(&self) {
                self.get("/users", list_users);
            }
        }
        fn main() {
            let r = Router::new();
            let api: Router = r.group("/api");
            api.user_routes();
        }
        fn list_users() {}
        "#,
    );
    assert_eq!(routes(&analysis), vec![(HttpMethod::Get, "/api/users".to_string())]);
}

#[test]
fn test_unresolvable_facts_are_skipped_with_diagnostics() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        fn main() {
            let r = Router::new();
            r.get(std::env::var("ROUTE"), list);
            r.get("/indexed", HANDLERS[0]);
            r.get("/fine", list);
            let dynamic = r.group(prefix_from_env());
            let prefix: String = load();
            r.group(prefix);
        }
        fn list() {}
        fn load() -> String { String::new() }
        "#,
    );
    assert_eq!(routes(&analysis), vec![(HttpMethod::Get, "/fine".to_string())]);
    let kinds: Vec<DiagnosticKind> = analysis.diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DiagnosticKind::UnresolvedPath,
            DiagnosticKind::UnresolvedHandler,
            DiagnosticKind::UnresolvedPath,
        ]
    );
    assert!(analysis.diagnostics[0].location.starts_with("src/main.rs:"));
}

const LOCAL_ROUTER: &str = r#"
pub struct Router {
    prefix: String,
}

impl Router {
    pub fn new() -> Router {
        Router { prefix: String::new() }
    }

    pub fn group(&self, prefix: &str) -> Router {
        let child = Router::new();
        Router { prefix: format!("{}{}", self.prefix, prefix) }
    }

    pub fn get(&self, path: &str, handler: fn()) {}
}
"#;

fn analyze_local(main: &str) -> (Program, Analysis) {
    let config = Config::from_yaml(
        "routerDefinitions:\n  - type: Router\n    endpointMethods: [get]\n    groupMethods: [group]\n",
    )
    .unwrap();
    let program = lower_sources(&[("src/router.rs", LOCAL_ROUTER), ("src/main.rs", main)]);
    let catalog = RouterCatalog::resolve(&config.router_definitions, &program).unwrap();
    let analysis = Analyzer::new(&program, &catalog, &config).analyze();
    (program, analysis)
}

#[test]
fn test_local_router_group_registers_only_under_prefix() {
    let (_, analysis) = analyze_local(
        r#"
        use crate::router::Router;
        fn main() {
            let r = Router::new();
            let api = r.group("/api");
            api.get("/users", users);
        }
        fn users() {}
        "#,
    );
    assert_eq!(routes(&analysis), vec![(HttpMethod::Get, "/api/users".to_string())]);
}

#[test]
fn test_local_router_constructor_calls_are_distinct_scopes() {
    let (program, analysis) = analyze_local(
        r#"
        use crate::router::Router;
        fn main() {
            let public = Router::new();
            public.get("/a", a);
            let admin = Router::new();
            admin.get("/b", b);
        }
        fn a() {}
        fn b() {}
        "#,
    );
    let operations = analysis.tree.operations();
    let scopes: Vec<(ScopeId, &str)> = operations
        .iter()
        .map(|(scope, op)| (*scope, op.full_path.as_str()))
        .collect();
    assert_eq!(scopes.len(), 2);
    assert_ne!(scopes[0].0, scopes[1].0);

    let bound: Vec<&str> = scopes
        .iter()
        .map(|(scope, _)| {
            let var = analysis.tree.scope(*scope).bound_variable.unwrap();
            program.var(var).name.as_str()
        })
        .collect();
    assert_eq!(bound, vec!["public", "admin"]);
}

#[test]
fn test_nest_and_merge_mount_routers_under_prefix() {
    let config = Config::default();
    let (_, analysis) = analyze_with(
        &config,
        r#"
        use axum::{Router, routing::get};
        fn users() -> Router {
            Router::new()
                .route("/users", get(list_users))
                .route("/users/:id", get(|| async { "user" }))
        }
        fn app() -> Router {
            Router::new()
                .route("/health", get(health))
                .nest("/api", users())
                .merge(admin())
        }
        fn admin() -> Router {
            Router::new().route("/admin", get(health))
        }
        async fn list_users() {}
        async fn health() {}
        "#,
    );
    assert_eq!(
        routes(&analysis),
        vec![
            (HttpMethod::Get, "/health".to_string()),
            (HttpMethod::Get, "/api/users".to_string()),
            (HttpMethod::Get, "/api/users/:id".to_string()),
            (HttpMethod::Get, "/admin".to_string()),
        ]
    );
    let operations = analysis.tree.operations();
    let (_, closure) = operations[2];
    assert_eq!(closure.handler_name, "get_api_users_id");
    assert_eq!(closure.path_parameters[0].name, "id");
    assert!(analysis.diagnostics.is_empty());
}

#[test]
fn test_router_returned_through_await_and_try() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        async fn build() -> Router {
            let r = Router::new();
            r.get("/inner", a);
            r
        }
        fn try_build() -> Result<Router, Error> {
            let r = Router::new();
            Ok(r)
        }
        async fn main() -> Result<(), Error> {
            let app = build().await;
            app.get("/after", b);
            let other = try_build()?;
            other.post("/tried", b);
            Ok(())
        }
        fn a() {}
        fn b() {}
        "#,
    );
    assert_eq!(
        routes(&analysis),
        vec![
            (HttpMethod::Get, "/inner".to_string()),
            (HttpMethod::Get, "/after".to_string()),
            (HttpMethod::Post, "/tried".to_string()),
        ]
    );
}

#[test]
fn test_helper_returns_router_only_to_its_own_caller() {
    let (_, analysis) = analyze(
        r#"
        use kite::Router;
        fn with_health(r: Router) -> Router {
            r.get("/health", health);
            r
        }
        fn main() {
            let public = with_health(Router::new());
            public.get("/public", page);
            let admin = with_health(Router::new()).group("/admin");
            admin.get("/panel", page);
        }
        fn health() {}
        fn page() {}
        "#,
    );
    assert_eq!(
        routes(&analysis),
        vec![
            (HttpMethod::Get, "/health".to_string()),
            (HttpMethod::Get, "/public".to_string()),
            (HttpMethod::Get, "/health".to_string()),
            (HttpMethod::Get, "/admin/panel".to_string()),
        ]
    );
}
