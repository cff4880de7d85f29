mod api;

pub use api::{
    CreateProductRequest, EchoResponse, HealthResponse, ListProductsQuery, PingResponse, Product,
    ProductListResponse, SignatureHealthResponse,
};
