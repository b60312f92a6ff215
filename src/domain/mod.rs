//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Domain model for the order pipeline: orders with their cart items and
// forward-only status lifecycle, and the broker events that drive it.
//--------------------------------------------------------------------------------------------------

pub mod event;
pub mod order;

pub use event::{
    Event, OrderCompletedPayload, OrderCreatedPayload, OrderFailedPayload, StatusPayload,
    ORDER_COMPLETED, ORDER_CREATED, ORDER_FAILED, ORDER_PROCESSING,
};
pub use order::{CartItem, Order, OrderStatus};
