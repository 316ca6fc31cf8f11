// froxlor-install --check|--setup
// Install fields are read from environment variables (mysql_host, admin_pass, ...).

fn main() {
    std::process::exit(froxlor_installer::run_cli());
}
