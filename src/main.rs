use std::path::PathBuf;

use candle_core::{Device, D};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use nano_speculative::{
    Batch, BigramModel, ModelContext, Result, SimpleVocab, SpeculativeConfig, SpeculativeDecoder,
    TokenId,
};

#[derive(Parser, Debug)]
#[command(name = "nano-speculative")]
#[command(about = "Speculative decoding with a draft model, on synthetic bigram models")]
struct Args {
    /// JSON file with speculative decoding parameters
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum draft tokens per step (overrides the config file)
    #[arg(long)]
    n_draft: Option<usize>,

    /// Minimum draft length before collapsing (overrides the config file)
    #[arg(long)]
    n_min: Option<usize>,

    /// Confidence floor (overrides the config file)
    #[arg(long)]
    p_min: Option<f32>,

    /// Vocabulary size
    #[arg(long, default_value = "256")]
    n_vocab: usize,

    /// Draft KV cache capacity
    #[arg(long, default_value = "256")]
    draft_capacity: usize,

    /// Prompt length
    #[arg(long, default_value = "64")]
    prompt_len: usize,

    /// Tokens to generate
    #[arg(long, default_value = "256")]
    max_tokens: usize,

    /// How strongly each token prefers its successor
    #[arg(long, default_value = "8.0")]
    sharpness: f32,

    /// Logit noise separating the draft from the target
    #[arg(long, default_value = "1.0")]
    noise: f32,

    /// RNG seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }

    let mut config = match &args.config {
        Some(path) => SpeculativeConfig::from_json_file(path)?,
        None => SpeculativeConfig::default(),
    };
    if let Some(n_draft) = args.n_draft {
        config.n_draft = n_draft;
    }
    if let Some(n_min) = args.n_min {
        config.n_min = n_min;
    }
    if let Some(p_min) = args.p_min {
        config.p_min = p_min;
    }

    info!("nano-speculative v{}", env!("CARGO_PKG_VERSION"));
    info!("  Config:     {:?}", config);
    info!("  Vocabulary: {} tokens", args.n_vocab);

    let device = Device::Cpu;
    let vocab = SimpleVocab::synthetic(args.n_vocab);
    let target_capacity = args.prompt_len + args.max_tokens + config.n_draft + 1;

    let mut target = BigramModel::random(
        vocab,
        target_capacity,
        args.sharpness,
        args.seed,
        &device,
    )?;
    let draft = target.perturbed(args.noise, args.draft_capacity, args.seed.wrapping_add(1))?;
    let mut decoder = SpeculativeDecoder::with_default_sampler(&target, draft, config)?;

    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(2));
    let mut prompt: Vec<TokenId> = (0..args.prompt_len.max(1))
        .map(|_| rng.gen_range(5..args.n_vocab.max(6) as TokenId))
        .collect();

    // Prefill the target and take its first token
    let mut batch_tgt = Batch::with_capacity(decoder.config().n_draft + 1);
    for (pos, &token) in prompt.iter().enumerate() {
        batch_tgt.add(token, pos, &[0], pos + 1 == prompt.len());
    }
    target.evaluate(&batch_tgt)?;
    let mut id_last = argmax(&target, prompt.len() - 1)?;

    let mut generated = 0;
    let mut target_passes = 0;
    let mut accepted_total = 0;

    while generated < args.max_tokens {
        let n_past = prompt.len();

        batch_tgt.clear();
        batch_tgt.add(id_last, n_past, &[0], true);
        decoder.add_draft(&mut batch_tgt, &prompt, id_last, n_past + 1)?;

        target.evaluate(&batch_tgt)?;
        target_passes += 1;

        // Greedy verification: keep drafts while they match the target's choice
        prompt.push(id_last);
        generated += 1;
        for i in 0..batch_tgt.len() {
            let predicted = argmax(&target, i)?;
            match batch_tgt.get(i + 1) {
                Some(next) if next.token == predicted => {
                    prompt.push(predicted);
                    accepted_total += 1;
                    generated += 1;
                }
                _ => {
                    id_last = predicted;
                    break;
                }
            }
        }

        target.cache_remove(0, prompt.len(), None);
    }

    let stats = decoder.stats();
    info!("Generated {} tokens in {} target passes", generated, target_passes);
    info!(
        "  Tokens/pass: {:.2}",
        generated as f64 / target_passes.max(1) as f64
    );
    info!(
        "  Accepted {} of {} exposed drafts ({:.1}%)",
        accepted_total,
        stats.exposed_tokens,
        100.0 * accepted_total as f64 / stats.exposed_tokens.max(1) as f64
    );
    info!(
        "  Draft cache: {} reused, {} evaluated, {} collapses",
        stats.reused_tokens, stats.evaluated_tokens, stats.collapses
    );

    Ok(())
}

fn argmax(ctx: &BigramModel, index: usize) -> Result<TokenId> {
    let logits = ctx.logits(index)?;
    Ok(logits.argmax(D::Minus1)?.to_scalar::<u32>()?)
}
