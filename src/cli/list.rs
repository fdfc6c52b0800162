use serde::Serialize;
use table::{IntoTable, Table};
pub(crate) mod table;

use crate::{
    config::Config,
    die,
    registry::{populate::populated_registry, Directory},
    ListArgs, ListObject, ListingFormat,
};

#[derive(Serialize)]
struct Provider {
    name: String,
    url: String,
    priority: u8,
    supported_models: Vec<String>,
}

impl From<Vec<Provider>> for Table {
    fn from(value: Vec<Provider>) -> Self {
        let mut tab = Table::new();

        tab.set_header(vec!["PROVIDER", "URL", "PRIORITY", "MODELS"]);

        for provider in value {
            tab.add_row(vec![
                provider.name,
                or_dash(provider.url),
                provider.priority.to_string(),
                or_dash(provider.supported_models.join(",")),
            ]);
        }

        tab
    }
}

#[derive(Serialize)]
struct Model {
    name: String,
    supported_provider_names: Vec<String>,
}

impl From<Vec<Model>> for Table {
    fn from(value: Vec<Model>) -> Self {
        let mut tab = Table::new();

        tab.set_header(vec!["MODEL", "PROVIDERS"]);

        for model in value {
            tab.add_row(vec![
                model.name,
                or_dash(model.supported_provider_names.join(",")),
            ]);
        }

        tab
    }
}

fn or_dash(cell: String) -> String {
    if cell.is_empty() {
        "-".to_string()
    } else {
        cell
    }
}

/// Providers in registration order.
fn get_providers(directory: &Directory) -> Vec<Provider> {
    directory
        .providers_in_order()
        .map(|p| Provider {
            name: p.name.clone(),
            url: p.url.clone(),
            priority: p.priority,
            supported_models: p.supported_models.iter().cloned().collect(),
        })
        .collect()
}

/// Models in preference order.
fn get_models(directory: &Directory) -> Vec<Model> {
    directory
        .preference()
        .iter()
        .filter_map(|name| directory.model(name))
        .map(|m| Model {
            name: m.name.clone(),
            supported_provider_names: m.supported_provider_names.iter().cloned().collect(),
        })
        .collect()
}

pub(crate) fn format_output<O: IntoTable + Serialize>(object: O, format: ListingFormat) {
    match format {
        ListingFormat::Json => match serde_json::to_string_pretty(&object) {
            Ok(output) => println!("{}", output),
            Err(err) => die!("failed to serialize the listing: {}", err),
        },
        ListingFormat::Table => {
            let tab = object.into_table();

            print!("{}", tab);
        }
        ListingFormat::HeaderlessTable => {
            let mut tab = object.into_table();

            tab.print_header(false);

            print!("{}", tab);
        }
    }
}

pub(crate) async fn list_cmd(config: &Config, args: &ListArgs) {
    let registry = match populated_registry(config).await {
        Ok(registry) => registry,
        Err(err) => die!("failed to build the directory: {}", err),
    };

    let directory = registry.baseline();

    match &args.object {
        ListObject::Providers => format_output(get_providers(directory), args.format),
        ListObject::Models => format_output(get_models(directory), args.format),
    }
}
