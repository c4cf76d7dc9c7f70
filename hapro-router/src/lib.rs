//! Request routing for the relay's HTTP surface.
//!
//! [`RouteTable::resolve`] splits the request path on `/` and compares it
//! segment by segment against each route in table order. Literal segments must
//! match exactly; placeholder segments (`:<name>Id`) match anything and are
//! captured into [`Params`]. Three outcomes:
//!
//! - `Matched`: path and verb match; carries the captured params
//! - `MethodNotAllowed`: the first path match wants another verb; the rest of
//!   the table is not consulted
//! - `NotFound`: no route has this shape
//!
//! There are no wildcards or catch-all tails; a route matches only paths with
//! exactly as many segments as its pattern.

pub mod endpoints;
pub mod route;

pub use endpoints::{table, Endpoint};
pub use route::{is_placeholder, Params, Route, RouteMatch, RouteTable, Segment};
