use std::{
    collections::HashMap,
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    time::Duration,
};

use eframe::egui::{self, Color32, RichText, TextEdit};
use httpfire::{
    fire, CancellationToken, DispatchOutcome, Dispatcher, FireArgs, Listener, MetricsEvent,
    Stats, SUPPORTED_METHODS,
};

#[derive(Debug)]
enum UiMessage {
    Event(MetricsEvent),
    Finished(Result<DispatchOutcome, String>),
}

struct FireGuiApp {
    runtime: tokio::runtime::Runtime,
    dispatcher: Dispatcher,
    _listener: Listener,
    tx: Sender<UiMessage>,
    rx: Receiver<UiMessage>,
    url: String,
    method: &'static str,
    headers_json: String,
    max_attempts: String,
    timeout_ms: String,
    status: String,
    last_error: Option<String>,
    in_flight: Option<CancellationToken>,
    log: Vec<String>,
    stats: Stats,
}

impl FireGuiApp {
    fn new() -> Result<Self, String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| format!("runtime init failed: {err}"))?;
        let dispatcher = Dispatcher::new().map_err(|err| err.to_string())?;
        let (tx, rx) = mpsc::channel();

        let events = tx.clone();
        let listener = {
            let _guard = runtime.enter();
            dispatcher
                .metrics()
                .listen(move |event| {
                    let _ = events.send(UiMessage::Event(event));
                })
                .map_err(|err| err.to_string())?
        };

        Ok(Self {
            runtime,
            dispatcher,
            _listener: listener,
            tx,
            rx,
            url: "http://localhost:3000".to_owned(),
            method: "GET",
            headers_json: "{}".to_owned(),
            max_attempts: "10".to_owned(),
            timeout_ms: "3500".to_owned(),
            status: "Ready".to_owned(),
            last_error: None,
            in_flight: None,
            log: Vec::new(),
            stats: Stats::default(),
        })
    }

    fn fire_async(&mut self) {
        let args = match self.build_args() {
            Ok(args) => args,
            Err(err) => {
                self.status = "Invalid input".to_owned();
                self.last_error = Some(err);
                return;
            }
        };

        let _guard = self.runtime.enter();
        let handle = match fire(&self.dispatcher, args) {
            Ok(handle) => handle,
            Err(err) => {
                self.status = "Rejected".to_owned();
                self.last_error = Some(err.to_string());
                return;
            }
        };

        self.status = format!("Dispatch #{} running...", handle.id());
        self.last_error = None;
        self.in_flight = Some(handle.cancellation_token());

        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let outcome = handle.await.map_err(|err| err.to_string());
            let _ = tx.send(UiMessage::Finished(outcome));
        });
    }

    fn build_args(&self) -> Result<FireArgs, String> {
        let headers: HashMap<String, String> = match self.headers_json.trim() {
            "" => HashMap::new(),
            raw => serde_json::from_str(raw).map_err(|err| format!("invalid headers JSON: {err}"))?,
        };
        let max_attempts = self
            .max_attempts
            .trim()
            .parse()
            .map_err(|err| format!("invalid max attempts: {err}"))?;
        let timeout_ms = self
            .timeout_ms
            .trim()
            .parse()
            .map_err(|err| format!("invalid timeout: {err}"))?;

        Ok(FireArgs {
            url: self.url.trim().to_owned(),
            method: self.method.to_owned(),
            headers,
            max_attempts,
            timeout_ms,
        })
    }

    fn poll_messages(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(UiMessage::Event(event)) => {
                    self.stats.observe(&event);
                    match event.payload() {
                        Ok(payload) => self.log.push(payload.to_string()),
                        Err(err) => self.log.push(format!("<unserializable event: {err}>")),
                    }
                }
                Ok(UiMessage::Finished(result)) => {
                    self.in_flight = None;
                    match result {
                        Ok(DispatchOutcome::Success(response)) => {
                            self.status = format!(
                                "Success {} ({} bytes)",
                                response.status,
                                response.body.len()
                            );
                        }
                        Ok(DispatchOutcome::Exhausted(last_error)) => {
                            self.status = "Exhausted".to_owned();
                            self.last_error = Some(last_error.to_string());
                        }
                        Ok(DispatchOutcome::Cancelled) => self.status = "Cancelled".to_owned(),
                        Err(err) => {
                            self.status = "Dispatch failed".to_owned();
                            self.last_error = Some(err);
                        }
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn render_stats(&self, ui: &mut egui::Ui) {
        let snapshot = self.stats.snapshot();
        egui::Grid::new("stats").striped(true).show(ui, |ui| {
            let rows = [
                ("Requests", snapshot.total_requests.to_string()),
                ("Errors", snapshot.total_errors.to_string()),
                ("Timeouts", snapshot.total_timeouts.to_string()),
                ("Bytes", snapshot.total_bytes.to_string()),
                ("Mean (ms)", format!("{:.1}", snapshot.mean_duration_ms)),
                ("Median (ms)", format!("{:.1}", snapshot.median_duration_ms)),
                ("p90 (ms)", format!("{:.1}", snapshot.duration_p90)),
                ("p99 (ms)", format!("{:.1}", snapshot.duration_p99)),
            ];
            for (label, value) in rows {
                ui.label(label);
                ui.label(value);
                ui.end_row();
            }
        });
    }
}

impl eframe::App for FireGuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_messages();

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.heading("httpfire");
            ui.separator();

            ui.horizontal(|ui| {
                ui.label("URL");
                ui.add(TextEdit::singleline(&mut self.url).desired_width(500.0));
            });
            ui.horizontal(|ui| {
                ui.label("Method");
                for method in SUPPORTED_METHODS {
                    ui.selectable_value(&mut self.method, method, method);
                }
            });
            ui.horizontal(|ui| {
                ui.label("Max attempts");
                ui.add(TextEdit::singleline(&mut self.max_attempts).desired_width(60.0));
                ui.label("Timeout (ms)");
                ui.add(TextEdit::singleline(&mut self.timeout_ms).desired_width(80.0));
            });
            ui.label("Headers JSON");
            ui.add(
                TextEdit::multiline(&mut self.headers_json)
                    .desired_rows(2)
                    .code_editor()
                    .desired_width(f32::INFINITY),
            );

            ui.horizontal(|ui| {
                let running = self.in_flight.is_some();
                if ui
                    .add_enabled(!running, egui::Button::new("FIRE!"))
                    .clicked()
                {
                    self.fire_async();
                }
                if ui
                    .add_enabled(running, egui::Button::new("Cancel"))
                    .clicked()
                {
                    if let Some(token) = &self.in_flight {
                        token.cancel();
                    }
                }
                if ui.button("Clear").clicked() {
                    self.log.clear();
                    self.stats = Stats::default();
                }

                let status_color = if self.last_error.is_some() {
                    Color32::from_rgb(215, 40, 40)
                } else {
                    Color32::from_rgb(35, 120, 35)
                };
                ui.label(RichText::new(format!("Status: {}", self.status)).color(status_color));
                if running {
                    ui.spinner();
                }
            });
            if let Some(error) = &self.last_error {
                ui.colored_label(Color32::from_rgb(215, 40, 40), error);
            }
        });

        egui::SidePanel::right("stats").show(ctx, |ui| {
            ui.heading("Stats");
            self.render_stats(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("metrics_update");
            egui::ScrollArea::vertical()
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in &self.log {
                        ui.monospace(line);
                    }
                });
        });

        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

fn main() -> eframe::Result<()> {
    let app = match FireGuiApp::new() {
        Ok(app) => app,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    let options = eframe::NativeOptions::default();
    eframe::run_native(
        "httpfire GUI",
        options,
        Box::new(|_cc| Box::new(app)),
    )
}
