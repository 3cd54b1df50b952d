//! JSON-RPC 2.0 envelopes and method payloads spoken to the settlement
//! service (spec.md §4.8, §6). Kept separate from `relay`'s connection
//! handling so the wire shapes can be depended on without pulling in tokio
//! or a WebSocket client.

mod envelope;
mod methods;

pub use envelope::{RpcError, RpcId, RpcNotification, RpcRequest, RpcResponse};
pub use methods::{
    AccountBalance, ClaimAllChannelsResult, ConvertToAktParams, ConvertToAktResult,
    GetBalanceParams, RoutingStats, SubscriptionData, SubscriptionParams, VerifyClaimParams,
    VerifyClaimResult,
};
