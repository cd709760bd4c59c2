pub struct Router {
    prefix: String,
    routes: Vec<(String, String)>,
}

impl Router {
    pub fn new() -> Router {
        Router {
            prefix: String::new(),
            routes: Vec::new(),
        }
    }

    pub fn scope(&self, prefix: &str) -> Router {
        let mut child = Router::new();
        child.prefix = format!("{}{}", self.prefix, prefix);
        child
    }

    pub fn get<H>(&self, path: &str, handler: H) {}

    pub fn post<H>(&self, path: &str, handler: H) {}

    pub fn mount(&self, prefix: &str, other: Router) {}
}
