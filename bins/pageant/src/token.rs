//! Token mode - mint a development bearer token

use anyhow::Result;
use clap::Args;
use pageant_server::api::auth::generate_token;
use uuid::Uuid;

#[derive(Args, Debug)]
pub struct TokenArgs {
    /// User id the token asserts
    #[arg(long)]
    pub user: Uuid,

    /// HS256 secret shared with the server
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    /// Lifetime in seconds
    #[arg(long, default_value_t = 86_400)]
    pub ttl: i64,
}

pub fn run(args: TokenArgs) -> Result<()> {
    let token = generate_token(args.user, &args.jwt_secret, args.ttl)?;
    println!("{}", token);
    Ok(())
}
