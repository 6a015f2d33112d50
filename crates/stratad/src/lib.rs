//! Library surface backing the `stratad` binary. Split out so
//! `tests/integration` can spin up a real worker loop in-process against
//! `127.0.0.1:0`, the same way `libstrata`'s own tests reach for
//! `strata-backend`'s in-memory backends directly rather than shelling out.

pub mod config;
pub mod worker;
