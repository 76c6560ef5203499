pub mod fanout;
pub mod routes;
