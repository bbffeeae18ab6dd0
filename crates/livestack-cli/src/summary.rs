use console::Style;
use livestack_core::config::SessionConfig;
use livestack_core::session::{SessionEvent, SessionStatus, Severity};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn on_off(s: &Styles, enabled: bool, detail: String) -> String {
    if enabled {
        s.method.apply_to(detail).to_string()
    } else {
        s.disabled.apply_to("disabled").to_string()
    }
}

pub fn print_session_summary(config: &SessionConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Live Stacking Session"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(21)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Scan folder"),
        s.path.apply_to(config.paths.scan_folder.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Work folder"),
        s.path.apply_to(config.paths.work_folder.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Workers"),
        s.value.apply_to(format!("{} (queue {})", config.workers, config.queue_size))
    );
    if let Some(pattern) = config.bayer_pattern {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Raw frames"),
            s.method.apply_to(pattern)
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Pre-processing"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Hot pixels"),
        on_off(
            &s,
            config.preprocess.hot_pixel.enabled,
            format!("factor {}", config.preprocess.hot_pixel.params.factor)
        )
    );
    let dark = config
        .preprocess
        .dark
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "no path".into());
    println!(
        "    {:<12}{}",
        s.label.apply_to("Dark"),
        on_off(&s, config.preprocess.dark.enabled, dark)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Debayer"),
        on_off(&s, config.preprocess.debayer, "when raw".into())
    );
    println!();

    println!("  {}", s.header.apply_to("Alignment"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Stars"),
        on_off(
            &s,
            config.alignment.enabled,
            format!("min {} matches", config.alignment.min_matches)
        )
    );
    println!();

    println!("  {}", s.header.apply_to("Stacking"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(config.stacking.method)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Scale"),
        s.value.apply_to(config.stacking.normalization)
    );
    println!();

    let post = &config.postprocess;
    println!("  {}", s.header.apply_to("Post-processing"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Stretch"),
        on_off(
            &s,
            post.autostretch.enabled,
            format!(
                "{} strength {}",
                post.autostretch.params.method, post.autostretch.params.strength
            )
        )
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Levels"),
        on_off(
            &s,
            post.levels.enabled,
            format!(
                "{} / {} / {}",
                post.levels.params.black, post.levels.params.midtones, post.levels.params.white
            )
        )
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("RGB"),
        on_off(
            &s,
            post.rgb_balance.enabled,
            format!(
                "{} / {} / {}",
                post.rgb_balance.params.red,
                post.rgb_balance.params.green,
                post.rgb_balance.params.blue
            )
        )
    );
    println!();

    println!(
        "  {:<14}{}",
        s.header.apply_to("Output"),
        s.value.apply_to(format!(
            "{}{}",
            config.output.format,
            if config.output.save_every_image {
                ", every image"
            } else {
                ""
            }
        ))
    );
    println!(
        "  {:<14}{}",
        s.header.apply_to("Web"),
        on_off(
            &s,
            config.web.autostart,
            format!("port {}", config.web.port)
        )
    );
    println!();
}

pub fn print_status(status: &SessionStatus) {
    let s = Styles::new();

    println!(
        "  {:<14}{}",
        s.label.apply_to("State"),
        s.value.apply_to(status.state)
    );
    if let Some(started) = status.started_at {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Started"),
            s.value.apply_to(started.format("%H:%M:%S"))
        );
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Stack"),
        s.value.apply_to(format!(
            "{} frame(s), {}, alignment {}",
            status.stack_size,
            status.method,
            if status.alignment { "on" } else { "off" }
        ))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(format!(
            "{} stacked, {} discarded",
            status.processed, status.discarded
        ))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Queue"),
        s.value.apply_to(format!(
            "{} waiting (peak {}), {} save(s) pending",
            status.queue_depth, status.queue_high_water, status.save_queue_depth
        ))
    );
    match status.web_address {
        Some(ref address) => println!(
            "  {:<14}{}",
            s.label.apply_to("Web"),
            s.path.apply_to(address)
        ),
        None => println!(
            "  {:<14}{}",
            s.label.apply_to("Web"),
            s.disabled.apply_to("stopped")
        ),
    }
}

/// One console line per event, colored by severity.
pub fn print_event(event: &SessionEvent) {
    let style = match event.severity() {
        Severity::Debug => Style::new().dim(),
        Severity::Info => Style::new(),
        Severity::Warning => Style::new().yellow(),
        Severity::Error => Style::new().red().bold(),
    };
    let tag = match event {
        SessionEvent::FrameStacked { .. } => Style::new().green().apply_to("+"),
        SessionEvent::FrameDiscarded { .. } => Style::new().red().apply_to("x"),
        _ => Style::new().dim().apply_to("-"),
    };
    println!("  {} {}", tag, style.apply_to(event));
}
