use autumnus::{FormatterOption, Options, highlight, themes};
use iocraft::prelude::*;
use oncosweep::ChunkedUploadProgress;
use serde_json::Value;
use tokio::sync::watch;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// What the progress bar shows: the file being sent and its progress.
#[derive(Clone, Debug, Default)]
pub struct UploadStatus {
    pub title: String,
    pub progress: ChunkedUploadProgress,
}

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub status: Option<watch::Receiver<UploadStatus>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut current = hooks.use_state(|| {
        props
            .status
            .as_ref()
            .map(|receiver| receiver.borrow().clone())
            .unwrap_or_default()
    });
    let receiver = props.status.clone();

    hooks.use_future(async move {
        let Some(mut receiver) = receiver else {
            return;
        };
        while receiver.changed().await.is_ok() {
            let latest = receiver.borrow_and_update().clone();
            current.set(latest);
        }
    });

    let UploadStatus { title, progress } = current.read().clone();
    let label = format!(
        "{:>5.1}% {:.1}/{:.1} MiB",
        progress.percent(),
        progress.bytes_uploaded as f64 / BYTES_PER_MIB,
        progress.total_bytes as f64 / BYTES_PER_MIB,
    );

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: title)
            View(flex_direction: FlexDirection::Row) {
                View(border_style: BorderStyle::Round, border_color: Color::Blue, width: 52) {
                    View(width: Percent(progress.percent()), height: 1, background_color: Color::Green)
                }
                View(padding_left: 1) {
                    Text(content: label)
                }
            }
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: props.message.clone())
        }
    }
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(content: props.message.clone())
        }
    }
}

pub fn print_success(message: impl Into<String>) {
    let message: String = message.into();
    element!(SuccessMessage(message: message)).print();
}

pub fn print_error(message: impl Into<String>) {
    let message: String = message.into();
    element!(ErrorMessage(message: message)).print();
}

/// Prints a field returned by the platform: text as is, anything else as
/// highlighted JSON.
pub fn print_value(value: &Value) -> anyhow::Result<()> {
    match value {
        Value::String(text) => println!("{}", text),
        other => {
            let output = highlight(
                &serde_json::to_string_pretty(other)?,
                Options {
                    formatter: FormatterOption::Terminal {
                        theme: Some(
                            themes::get("ayu_light").expect("Syntax highlighting theme not found"),
                        ),
                    },
                    lang_or_file: Some("json"),
                },
            );
            println!("{}", output);
        }
    }
    Ok(())
}
