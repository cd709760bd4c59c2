use kite::{Json, Path};

pub struct Order {
    pub id: u64,
    pub lines: Vec<OrderLine>,
}

pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
}

pub struct NewOrder {
    pub lines: Vec<OrderLine>,
}

pub fn health() -> &'static str {
    "ok"
}

pub fn report() {}

pub fn invoice() {}

/// Fetch an order
pub fn get_order(id: Path<u64>) -> Json<Order> {
    todo!()
}

pub fn create_order(body: Json<NewOrder>) -> Json<Order> {
    todo!()
}
