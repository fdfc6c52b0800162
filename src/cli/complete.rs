use std::io::{self, IsTerminal, Read, Write};
use std::sync::Arc;

use crate::{
    chat::Message,
    config::Config,
    die,
    registry::populate::populated_registry,
    resolver::{Constraints, Resolver},
    CompleteArgs,
};

/// The prompt comes either from the positional argument or from standard
/// input, never both.
fn read_prompt(args: &CompleteArgs) -> String {
    let in_terminal = io::stdin().is_terminal();

    if let Some(prompt) = &args.prompt {
        if !in_terminal {
            die!("it appears that a prompt is being provided both through standard input and the prompt argument");
        }

        return prompt.clone();
    }

    if in_terminal {
        die!("no prompt given, pass one as an argument or through standard input");
    }

    let mut buf = String::new();

    if let Err(err) = io::stdin().read_to_string(&mut buf) {
        die!("failed to read the prompt from standard input: {}", err);
    }

    buf
}

pub(crate) async fn complete_cmd(config: &Config, args: &CompleteArgs) {
    let prompt = read_prompt(args);

    if prompt.trim().is_empty() {
        die!("the prompt is empty");
    }

    let registry = match populated_registry(config).await {
        Ok(registry) => Arc::new(registry),
        Err(err) => die!("failed to build the directory: {}", err),
    };

    let resolver = Resolver::new(registry, &config.resolver);
    let constraints = Constraints::new(args.model.clone(), args.provider.clone());

    let result = resolver
        .stream(&[Message::user(prompt)], &constraints, |part| {
            let mut stdout = io::stdout().lock();

            // A closed stdout is not worth aborting the completion over
            let _ = stdout.write_all(part.as_bytes());
            let _ = stdout.flush();
        })
        .await;

    match result {
        Ok(completion) => {
            println!();

            tracing::info!("completed by {}/{}", completion.provider, completion.model);
        }
        Err(err) => die!("completion failed: {}", err),
    }
}
