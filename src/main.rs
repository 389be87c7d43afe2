use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::{Args, Parser, Subcommand};

use wrapchain::{
    Audit, Blob, Child, CodecConfig, Command as ChainCommand, Compression, Context, InitOptions,
    Layer, Make, ObjectId, Passthrough, SequentialIds, Value, WrappedValue, digest, dispatch,
    initialize, logging, simplify,
};

#[derive(Parser)]
#[command(name = "wrapchain", version, about = "Build and exercise wrapper chains")]
struct Cli {
    /// Log dispatch routing at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Ids to hand out before the sequential counter (repeatable)
    #[arg(long = "seed-id", global = true, value_name = "ID")]
    seed_ids: Vec<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the layer trace and ids of a chain
    Trace {
        #[command(flatten)]
        chain: ChainArgs,
    },
    /// Dispatch an operation through a chain
    Run {
        #[command(flatten)]
        chain: ChainArgs,
        /// Operation name, dotted paths allowed (e.g. concat, audit.entries)
        #[arg(long)]
        op: String,
        /// Extra operands, each wrapped in the same layers (repeatable)
        #[arg(long = "arg", value_name = "TEXT")]
        args: Vec<String>,
    },
    /// Serialize a chain and report the frame
    Ser {
        #[command(flatten)]
        chain: ChainArgs,
        /// Compression scheme: brotli (default) or none
        #[arg(long, default_value = "brotli")]
        compression: Compression,
        /// Brotli quality 0..=11
        #[arg(long, default_value_t = 5)]
        quality: u32,
        /// Also print the simplified chain as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ChainArgs {
    /// Layers from outermost to innermost: passthrough, audit or audit:LABEL
    #[arg(long, value_delimiter = ',', default_value = "audit")]
    layers: Vec<String>,
    /// Leaf payload
    #[arg(long, default_value = "")]
    text: String,
    /// Tags applied to the outermost layer (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Description of the outermost layer
    #[arg(long)]
    describe: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let ids = SequentialIds::new().with_given(cli.seed_ids.into_iter().map(ObjectId));
    let ctx = Context::new().with_ids(Arc::new(ids));

    match cli.command {
        Command::Trace { chain } => cmd_trace(&ctx, &chain),
        Command::Run { chain, op, args } => cmd_run(&ctx, &chain, &op, &args),
        Command::Ser {
            chain,
            compression,
            quality,
            json,
        } => {
            if quality > 11 {
                bail!("--quality must be between 0 and 11, got {quality}");
            }
            let ctx = ctx.with_codec(CodecConfig {
                compression,
                brotli_quality: quality,
                ..CodecConfig::default()
            });
            cmd_ser(&ctx, &chain, json)
        }
    }
}

fn cmd_trace(ctx: &Context, args: &ChainArgs) -> Result<()> {
    let layers = parse_layers(&args.layers)?;
    let value = build_chain(ctx, &layers, args, &args.text)?;
    println!("{value}");
    let mut current = Some(&value);
    while let Some(layer) = current {
        let tags = layer.tags().iter().cloned().collect::<Vec<_>>().join(",");
        println!("  {} id={} tags=[{tags}]", layer.type_key(), layer.id());
        current = match layer.child() {
            Some(Child::Wrapped(inner)) => Some(inner),
            _ => None,
        };
    }
    Ok(())
}

fn cmd_run(ctx: &Context, args: &ChainArgs, op: &str, extra: &[String]) -> Result<()> {
    let layers = parse_layers(&args.layers)?;
    let Some(outer) = layers.first() else {
        bail!("specify at least one layer via --layers");
    };
    let mut operands = vec![Value::from(build_chain(ctx, &layers, args, &args.text)?)];
    for text in extra {
        operands.push(build_chain(ctx, &layers, args, text)?.into());
    }

    let response = dispatch(ctx, outer, ChainCommand::new(op, operands))
        .with_context(|| format!("dispatching `{op}`"))?;
    println!("{response}");
    if let Some(text) = leaf_text(&response) {
        println!("leaf: {text:?}");
    }

    for layer in layers.iter().filter(|l| l.type_key().name() == Audit::KIND) {
        let label = dispatch(ctx, layer, ChainCommand::new("audit.label", Vec::new()))?;
        let entries = dispatch(ctx, layer, ChainCommand::new("audit.entries", Vec::new()))?;
        println!("audit {label}: {entries}");
    }
    Ok(())
}

fn cmd_ser(ctx: &Context, args: &ChainArgs, json: bool) -> Result<()> {
    let layers = parse_layers(&args.layers)?;
    let value = build_chain(ctx, &layers, args, &args.text)?;
    let frame = value.serialize(ctx)?;
    println!(
        "{value}: {} bytes ({}), sha256 {}",
        frame.len(),
        ctx.codec().compression,
        digest::to_hex(&digest::compute(&frame))
    );
    if json {
        let simplified = simplify(&value)?;
        println!("{}", serde_json::to_string_pretty(&simplified)?);
    }
    Ok(())
}

fn parse_layers(specs: &[String]) -> Result<Vec<Arc<dyn Layer>>> {
    specs
        .iter()
        .map(|spec| {
            let (kind, label) = match spec.split_once(':') {
                Some((kind, label)) => (kind.trim(), Some(label.trim())),
                None => (spec.trim(), None),
            };
            match (kind, label) {
                ("passthrough", None) => Ok(Passthrough::layer()),
                ("audit", label) => Ok(Audit::layer(label.unwrap_or("audit"))),
                _ => bail!("unknown layer `{spec}`; expected passthrough, audit or audit:LABEL"),
            }
        })
        .collect()
}

/// Wrap a fresh `Blob` leaf in `layers`, outermost first.
fn build_chain(
    ctx: &Context,
    layers: &[Arc<dyn Layer>],
    args: &ChainArgs,
    text: &str,
) -> Result<WrappedValue> {
    let leaf = initialize(ctx, Blob::default(), InitOptions::new().args(vec![text.into()]))?;
    let mut layers = layers.iter().rev();
    let Some(innermost) = layers.next() else {
        bail!("specify at least one layer via --layers");
    };
    let mut value = Make::new(innermost.clone())
        .child(leaf.into_inner())
        .build(ctx);
    for layer in layers {
        value = Make::new(layer.clone()).child(value).build(ctx);
    }
    if let Some(text) = &args.describe {
        value.describe(text.clone());
    }
    if !args.tags.is_empty() {
        value.tag(args.tags.iter().cloned())?;
    }
    Ok(value)
}

fn leaf_text(value: &Value) -> Option<String> {
    let mut child = match value {
        Value::Wrapped(w) => w.child()?,
        _ => return None,
    };
    loop {
        child = match child {
            Child::Wrapped(w) => w.child()?,
            Child::Native(n) => return n.downcast_ref::<Blob>().map(Blob::text),
        };
    }
}
