// handlers/mod.rs - Handler tiers
//
// file:   header + JWT authenticated (/file/*, /delete/all)
// socket: authenticated by the handshake message after the upgrade (/pws/*)
pub mod file;
pub mod socket;
