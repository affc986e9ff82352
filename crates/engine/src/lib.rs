pub mod engine;
pub mod gateway;
pub mod settlement;
pub mod sweeper;

pub use engine::{
    CreateSessionRequest, EngineConfig, SessionDetail, SessionEngine, SubmitQuoteRequest,
};
pub use gateway::{GatewayResponse, IdempotencyGateway};
pub use settlement::SettlementEngine;
pub use sweeper::{DeadlineSweeper, SweepReport};
