// Axum fixture: chained method routers, a router-building helper and a trailing layer
use axum::{
    extract::{Path, Query},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
    pub email: String,
    pub manager: Option<Box<User>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

/// List users
///
/// Returns one page of users.
async fn get_users(Query(query): Query<ListQuery>) -> Json<Vec<User>> {
    Json(vec![])
}

async fn get_user(Path(id): Path<u32>) -> Json<User> {
    todo!()
}

async fn create_user(Json(payload): Json<CreateUserRequest>) -> Json<User> {
    todo!()
}

async fn delete_user(Path(id): Path<u32>) {}

async fn health_check() -> &'static str {
    "OK"
}

fn user_routes(router: Router) -> Router {
    router
        .route("/users", get(get_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).delete(
                describe(delete_user)
                    .summary("Remove a user")
                    .tag("admin")
                    .into_handler(),
            ),
        )
}

pub fn app() -> Router {
    let router = Router::new().route("/health", get(health_check));
    user_routes(router).layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() {
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    axum::serve(listener, app()).await.unwrap();
}
