pub mod challenge_client;

pub use challenge_client::ChallengeClient;
