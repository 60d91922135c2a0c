use crate::content::{ContentBundle, ContentSource};
use crate::game::application::{ClientApplication, CycleResult, ToastSink};
use crate::game::consumers::{AssetCatalog, LocaleCatalog};
use crate::notify::{NotificationSpec, NotificationTable, Toast};
use crate::recovery::diagnostics::CrashReportWriter;
use crate::reload::consumer::ConsumerRegistry;
use crate::settings::{CliArgs, PersistedSelection};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

mod content;
mod game;
mod notify;
mod recovery;
mod reload;
mod settings;

fn main() {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let data_dir = PathBuf::from(&args.data_dir);
    let selection_path = data_dir.join("selection.json");
    let mut selection = PersistedSelection::load(&selection_path).unwrap_or_else(|error| {
        warn!("Falling back to the default selection: {:#}", error);
        PersistedSelection::default()
    });
    if selection.bundles.is_empty() {
        selection = default_selection(&args.locale);
    }
    if args.distrust_optional_packs {
        for bundle in selection.bundles.iter_mut().filter(|bundle| !bundle.required) {
            bundle.compatible = false;
        }
    }

    let mut registry = ConsumerRegistry::new();
    registry.register(Arc::new(LocaleCatalog::new(&args.locale)));
    registry.register(Arc::new(AssetCatalog::new()));

    let diagnostics = Arc::new(CrashReportWriter::new(data_dir.join("crash-reports")));
    let mut app = ClientApplication::new(registry, selection.clone(), selection_path, diagnostics)
        .expect("Client application to build");

    app.configure_notifications(&default_notification_table(), |tag| tag.starts_with("client."));

    let result = app
        .run_reload_cycle(selection.current_set())
        .expect("Reload cycle to finish");

    app.pump_toasts(&mut LogToastSink);
    app.shutdown();

    match result {
        CycleResult::Succeeded { stripped_content } => {
            if stripped_content {
                info!("Content loaded, but some optional packs were disabled and the reload retried");
            } else {
                info!("Content loaded");
            }
        }
        CycleResult::Fatal { report } => {
            if let Some(report) = report {
                info!("See the crash report at {}", report.display());
            }
            std::process::exit(1);
        }
    }
}

fn default_selection(locale: &str) -> PersistedSelection {
    PersistedSelection {
        bundles: vec![
            ContentBundle::required("base"),
            ContentBundle::required(format!("lang-{}", locale)),
            ContentBundle::optional("hd-textures"),
            ContentBundle::optional(format!("voice-{}", locale)),
        ],
    }
}

fn default_notification_table() -> NotificationTable {
    let mut table = NotificationTable::new();
    table.insert(
        "client.session-reminder",
        NotificationSpec::new(0, 60, "notification.session.title", "notification.session.message"),
    );
    table.insert(
        "client.backup-reminder",
        NotificationSpec::new(30, 240, "notification.backup.title", "notification.backup.message"),
    );
    table
}

struct LogToastSink;

impl ToastSink for LogToastSink {
    fn show_toast(&mut self, toast: &Toast) {
        info!(
            "[toast] {} / {} (period {})",
            toast.title_key, toast.message_key, toast.boundary
        );
    }
}
