//! Channel handler implementations. `dk` and `fba` are reference handlers
//! shipped with Courier: a generic SMS aggregator and a Facebook-style
//! Messenger integration, covering the two inbound shapes (anonymous form
//! POST vs signed JSON webhook) every real handler builds on.

pub mod dk;
pub mod fba;
