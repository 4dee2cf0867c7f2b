//! OpenAPI documentation aggregator.

use utoipa::OpenApi;

use super::handlers;
use super::types::{
    CreateHoldRequest, CreateOrderRequest, HealthResponse, HoldCreatedResponse,
    HoldReleasedResponse, HoldResponse, OrderCreatedResponse, ProductResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Flash-Sale Checkout API",
        description = "Stock holds, orders, and idempotent payment webhooks",
    ),
    paths(
        handlers::health::health_check,
        handlers::products::get_product,
        handlers::holds::create_hold,
        handlers::holds::get_hold,
        handlers::holds::release_hold,
        handlers::orders::create_order,
        handlers::webhook::payment_webhook,
    ),
    components(schemas(
        ProductResponse,
        CreateHoldRequest,
        HoldCreatedResponse,
        HoldResponse,
        HoldReleasedResponse,
        CreateOrderRequest,
        OrderCreatedResponse,
        HealthResponse,
    )),
    tags(
        (name = "Products", description = "Catalog read path"),
        (name = "Holds", description = "Stock reservation"),
        (name = "Orders", description = "Order creation"),
        (name = "Payments", description = "Payment gateway callbacks"),
        (name = "Health", description = "Liveness"),
    )
)]
pub struct ApiDoc;
