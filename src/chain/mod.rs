// On-chain registration sync.
//
// The id registry emits a `Register(to, id, ...)` event for every new fid.
// `rpc` reads those events over JSON-RPC; `registrations` turns them into
// profile rows, both for the historical catch-up and for live polling.

pub mod registrations;
pub mod rpc;
