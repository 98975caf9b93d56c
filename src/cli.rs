#![allow(unused)]
use std::str::FromStr;

use anyhow::Result;
use api::*;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use secp256k1::{
    ecdsa::Signature, generate_keypair, hashes::sha256::Hash, rand, Message, SecretKey,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::client::Client;

mod api;
mod client;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long)]
    url: String,
}
#[derive(Subcommand)]
enum Commands {
    GenerateKeys,
    Login,
    CreatePrediction {
        /// UP or DOWN
        #[arg(short, long)]
        direction: Direction,
        /// Seconds until the prediction can be validated
        #[arg(long)]
        holdout: i64,
        /// Whole tokens, up to 9 decimals
        #[arg(short, long)]
        amount: Decimal,
        #[arg(long)]
        asset: AssetSymbol,
    },
    ValidatePrediction {
        #[arg(short, long)]
        prediction: RowId,
    },
    GetPrediction {
        #[arg(short, long)]
        prediction: RowId,
    },
    GetPredictions,
    GetBalance,
    GetPools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let client = Client::new(cli.url);

    match cli.command {
        Commands::GenerateKeys => {
            let keys = generate_keypair(&mut rand::thread_rng());
            println!("Pubkey: {}", keys.1);
            let mut private = File::create("ecdsa.key").await?;
            let mut public = File::create("ecdsa.pub").await?;
            private
                .write_all(format!("{}", keys.0.display_secret()).as_bytes())
                .await?;
            public.write_all(keys.1.to_string().as_bytes()).await?;
        }
        Commands::Login => {
            let secret_key = read_secret().await?;
            let user = UserPubKey::from_secret_key_global(&secret_key);
            let challenge = client.get_login_challenge(user).await?;
            let message = Message::from_hashed_data::<Hash>(challenge.as_bytes());
            let signature = secret_key.sign_ecdsa(message);
            let mut file = File::create("access_token").await?;
            file.write_all(signature.to_string().as_bytes()).await?;
            let mut file = File::create("challenge").await?;
            file.write_all(challenge.as_bytes()).await?;
            println!("Signed Challenge \"{}\"", challenge);
            client.try_login(user, signature, challenge).await?;
            println!("Logged in as {}", user);
        }
        Commands::CreatePrediction {
            direction,
            holdout,
            amount,
            asset,
        } => {
            let request = CreatePredictionRequest {
                direction,
                holdout_period_sec: holdout,
                bid_amount: tokens_from_whole(amount)?,
                asset,
            };
            let id = client.create_prediction(request, get_access().await?).await?;
            println!("Created prediction {}", id);
        }
        Commands::ValidatePrediction { prediction } => {
            let record = client.validate_prediction(prediction).await?;
            match record.state {
                PredictionState::Pending => println!(
                    "Prediction {} is held until {}",
                    prediction, record.expiry_at
                ),
                PredictionState::Settled => println!(
                    "Prediction {} settled, correct: {}",
                    prediction, record.is_correct
                ),
            }
            println!("{:#?}", record);
        }
        Commands::GetPrediction { prediction } => {
            let record = client.get_prediction(prediction).await?;
            println!("{:#?}", record);
        }
        Commands::GetPredictions => {
            let records = client.get_user_predictions(read_public().await?).await?;
            println!("{:#?}", records);
        }
        Commands::GetBalance => {
            let balance = client.get_balance(read_public().await?).await?;
            println!("{} ({} decimals)", balance, TOKEN_DECIMALS);
        }
        Commands::GetPools => {
            let pools = client.get_pool_balances().await?;
            println!(
                "Staking pool: {} | Prize pool: {}",
                pools.staking_pool, pools.prize_pool
            );
        }
    }
    Ok(())
}
async fn get_access() -> Result<AccessRequest> {
    let user = read_public().await?;
    let sig = read_token().await?;
    let challenge = read_challenge().await?;
    Ok(AccessRequest {
        user,
        sig,
        challenge,
    })
}
async fn read_secret() -> Result<SecretKey> {
    let mut file = File::open("ecdsa.key").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(SecretKey::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_public() -> Result<UserPubKey> {
    let mut file = File::open("ecdsa.pub").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(UserPubKey::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_token() -> Result<Signature> {
    let mut file = File::open("access_token").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(Signature::from_str(String::from_utf8(contents)?.as_str())?)
}
async fn read_challenge() -> Result<String> {
    let mut file = File::open("challenge").await?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(String::from_utf8(contents)?)
}
