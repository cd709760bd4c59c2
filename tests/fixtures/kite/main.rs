use kite::{Request, Router};

mod handlers;

fn api_key_auth(req: Request) {
    verify_api_key(req.header("X-API-Key"));
}

fn jwt_auth(req: Request) {
    let claims = jwt::decode(req.bearer());
}

fn main() {
    let app = Router::new();
    app.get("/health", handlers::health);

    let internal = app.group("/internal");
    describe_group(internal).tag("internal");
    let beta = internal.group("/beta");
    describe_group(beta).tag("beta");
    beta.get("/report", handlers::report);
    beta.get(
        "/invoice",
        describe(handlers::invoice).tag("billing").into_handler(),
    );

    let keyed = app.with(api_key_auth);
    let secured = keyed.with(jwt_auth);
    secured.group("/orders", |orders| {
        orders.get("/{id}", handlers::get_order);
        orders.post("", handlers::create_order);
    });

    app.get(std::env::var("DYNAMIC_ROUTE").unwrap(), handlers::health);
    app.serve("0.0.0.0:8080");
}
