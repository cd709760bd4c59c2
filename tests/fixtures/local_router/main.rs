use crate::router::Router;

mod handlers;
mod router;

fn item_routes() -> Router {
    let items = Router::new();
    items.get("/items", handlers::list_items);
    items.post("/items", handlers::create_item);
    items.get("/items/{id}", handlers::get_item);
    items
}

fn main() {
    let app = Router::new();
    app.get("/health", handlers::health);
    let v1 = app.scope("/v1");
    v1.mount("/store", item_routes());

    let admin = Router::new();
    admin.get("/stats", handlers::stats);
}
