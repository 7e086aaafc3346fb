//! proxybootd - ProxyDHCP PXE boot server
//!
//! Runs the ProxyDHCP responder and the TFTP image server side by side.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use macaddr::MacAddr6;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use proxyboot::config::DEFAULT_CONFIG_PATH;
use proxyboot::interface::{interface_by_name, interface_with_addr, list_interfaces};
use proxyboot::{
    Booter, Config, ConsoleReporter, EventReporter, ImageDispatcher, ImageMap,
    PlatformTransportFactory, ProxyDhcpServer, StaticBooter, TftpServer, TracingReporter,
};

#[derive(Parser)]
#[command(name = "proxybootd")]
#[command(about = "ProxyDHCP PXE boot server - chainloads PXE clients into iPXE")]
struct Args {
    /// Config file (key = value)
    #[arg(short, long, env = "PROXYBOOT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<Ipv4Addr>,

    /// DHCP port
    #[arg(long)]
    dhcp_port: Option<u16>,

    /// TFTP port
    #[arg(long)]
    tftp_port: Option<u16>,

    /// Port of the HTTP server handing out iPXE scripts
    #[arg(long)]
    http_port: Option<u16>,

    /// Interface to answer on when arrival interfaces are unknown (e.g., eth0)
    #[arg(short, long)]
    interface: Option<String>,

    /// Kernel to boot
    #[arg(long)]
    kernel: Option<String>,

    /// Initrd to boot, may be repeated
    #[arg(long)]
    initrd: Vec<String>,

    /// Kernel command line
    #[arg(long)]
    cmdline: Option<String>,

    /// Only boot these MAC addresses, may be repeated
    #[arg(long = "allow")]
    allow: Vec<MacAddr6>,

    /// Print boot events to stdout instead of the log
    #[arg(long)]
    console: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// List available network interfaces and exit
    #[arg(long)]
    list_interfaces: bool,
}

impl Args {
    /// Apply flags on top of the file and environment configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(port) = self.dhcp_port {
            config.dhcp_port = port;
        }
        if let Some(port) = self.tftp_port {
            config.tftp_port = port;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(interface) = &self.interface {
            config.interface = Some(interface.clone());
        }
        if let Some(kernel) = &self.kernel {
            config.kernel = Some(kernel.clone());
        }
        if !self.initrd.is_empty() {
            config.initrd = self.initrd.clone();
        }
        if let Some(cmdline) = &self.cmdline {
            config.cmdline = cmdline.clone();
        }
        if !self.allow.is_empty() {
            config.allowed_macs = Some(self.allow.clone());
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.list_interfaces {
        println!("Available network interfaces:");
        for iface in list_interfaces() {
            println!("  {}", iface);
        }
        return ExitCode::SUCCESS;
    }

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("proxybootd: {}", e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.tracing_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, config: &Config) -> Result<()> {
    info!("Starting proxybootd");
    if args.config.is_none() {
        info!("Config path: {} (if present)", DEFAULT_CONFIG_PATH);
    }

    let spec = match config.boot_spec() {
        Some(spec) => spec,
        None => bail!("No kernel configured (set kernel in the config file or pass --kernel)"),
    };
    let mut booter = StaticBooter::new(spec);
    if let Some(allowed) = &config.allowed_macs {
        info!("Booting only {} allow-listed machine(s)", allowed.len());
        booter = booter.with_allowed(allowed.iter().copied());
    }
    let booter: Arc<dyn Booter> = Arc::new(booter);

    let images = ImageMap::load(&config.image_paths())?;
    if images.is_empty() {
        warn!("No boot images configured; TFTP requests will fail");
    }

    let reporter: Arc<dyn EventReporter> = if args.console {
        Arc::new(ConsoleReporter::new().with_verbose(args.verbose))
    } else {
        Arc::new(TracingReporter)
    };

    let fallback = match &config.interface {
        Some(name) => Some(
            interface_by_name(name).with_context(|| format!("Interface '{}' not found", name))?,
        ),
        None => interface_with_addr(config.listen_addr),
    };
    let factory = PlatformTransportFactory::new(fallback);

    let dhcp = ProxyDhcpServer::new(booter, reporter.clone(), config.http_port);
    let tftp_addr = SocketAddr::V4(SocketAddrV4::new(config.listen_addr, config.tftp_port));
    let tftp = TftpServer::new(
        Arc::new(ImageDispatcher::new(Arc::new(images), reporter)),
        tftp_addr,
    );

    let dhcp_running = dhcp.running_flag();
    let tftp_running = tftp.running_flag();
    {
        let dhcp_running = dhcp_running.clone();
        let tftp_running = tftp_running.clone();
        ctrlc::set_handler(move || {
            info!("Shutting down...");
            dhcp_running.store(false, Ordering::SeqCst);
            tftp_running.store(false, Ordering::SeqCst);
        })
        .context("Failed to set Ctrl+C handler")?;
    }

    let tftp_socket = tftp.bind()?;
    let tftp_thread = thread::Builder::new()
        .name("tftp".to_string())
        .spawn(move || tftp.serve(tftp_socket))
        .context("Failed to start TFTP thread")?;

    let dhcp_addr = SocketAddrV4::new(config.listen_addr, config.dhcp_port);
    let dhcp_result = dhcp.run(&factory, dhcp_addr);

    // However DHCP ended, TFTP goes down with it.
    tftp_running.store(false, Ordering::SeqCst);
    let tftp_result = match tftp_thread.join() {
        Ok(result) => result,
        Err(_) => bail!("TFTP thread panicked"),
    };

    dhcp_result.context("ProxyDHCP server failed")?;
    tftp_result.context("TFTP server failed")?;

    info!("Server stopped");
    Ok(())
}
