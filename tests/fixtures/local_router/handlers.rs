use axum::{extract::Path, Json};

pub struct Item {
    pub id: u64,
    pub name: String,
}

pub struct NewItem {
    pub name: String,
}

pub fn health() -> &'static str {
    "ok"
}

pub fn stats() {}

pub fn list_items() -> Json<Vec<Item>> {
    todo!()
}

pub fn get_item(id: Path<u64>) -> Json<Item> {
    todo!()
}

pub fn create_item(body: Json<NewItem>) -> Json<Item> {
    todo!()
}
