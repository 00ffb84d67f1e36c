fn main() {
    if let Err(error) = focus_timer_lib::run() {
        eprintln!("focus-timer: {error}");
        std::process::exit(1);
    }
}
