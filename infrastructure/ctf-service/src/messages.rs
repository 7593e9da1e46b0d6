//! Player facing messages returned by the challenge routes.

pub const CHALLENGE_NOT_DEPLOYED_YET: &str = "Challenge is still deploying please wait...";
pub const CHALLENGE_NOT_COMPLETE: &str = "Challenge is not complete.";
pub const CHALLENGE_RESET: &str =
    "Challenge has been reset, please wait a moment for the challenge to be redeployed";
pub const RESET_RATE_LIMITED: &str = "Rate limit exceeded, retry in 1 minute";
pub const UNABLE_TO_CHECK_SOLVE: &str = "Unable to determine if challenge is solved.";
pub const ERROR_INTERNAL_SERVER_ERROR: &str = "An unknown error occurred.";
