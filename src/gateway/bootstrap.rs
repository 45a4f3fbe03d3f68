// Boot script the instance runs once, on first start.
//
// Each step runs in sequence. Unless strict mode is on, a failing command does
// not stop the script and the instance can end up partially configured.

use crate::gateway::{VPC_CIDR, VPN_POOL_CIDR, VPN_PORT, VPN_PROTOCOL};
use crate::graph::{Output, Template};
use anyhow::{Context, Result};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

pub const EASYRSA_VERSION: &str = "3.1.1";
pub const EASYRSA_DIR: &str = "/usr/local/EasyRSA";
pub const OPENVPN_DIR: &str = "/etc/openvpn";
pub const CLIENT_CONFIG_PATH: &str = "/tmp/client.ovpn";
pub const NAT_INTERFACE: &str = "eth0";
pub const SERVICE_UNIT: &str = "openvpn@server";

/// Local paths of the credential bundle, uploaded to the bucket root
pub const CREDENTIAL_ARTIFACTS: [&str; 4] = [
    CLIENT_CONFIG_PATH,
    "/etc/openvpn/ca.crt",
    "/usr/local/EasyRSA/pki/issued/client.crt",
    "/usr/local/EasyRSA/pki/private/client.key",
];

/// Object names the operator downloads after boot
pub fn artifact_names() -> Vec<&'static str> {
    CREDENTIAL_ARTIFACTS
        .iter()
        .filter_map(|path| path.rsplit('/').next())
        .collect()
}

/// OpenVPN server directives
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub proto: &'static str,
    pub pool: Ipv4Network,
    pub pushed_route: Ipv4Network,
    pub dns: Ipv4Addr,
}

impl ServerConfig {
    /// Pushes a route for the whole VPC and the VPC resolver (base address + 2)
    pub fn for_network(vpc_cidr: &str, pool_cidr: &str) -> Result<Self> {
        let vpc: Ipv4Network = vpc_cidr
            .parse()
            .with_context(|| format!("Invalid VPC CIDR: {}", vpc_cidr))?;
        let pool: Ipv4Network = pool_cidr
            .parse()
            .with_context(|| format!("Invalid VPN pool CIDR: {}", pool_cidr))?;

        let dns = u32::from(vpc.network())
            .checked_add(2)
            .map(Ipv4Addr::from)
            .filter(|addr| vpc.contains(*addr))
            .with_context(|| format!("VPC {} is too small to hold a resolver address", vpc))?;

        Ok(Self {
            port: VPN_PORT,
            proto: VPN_PROTOCOL,
            pool: Ipv4Network::new(pool.network(), pool.prefix())?,
            pushed_route: Ipv4Network::new(vpc.network(), vpc.prefix())?,
            dns,
        })
    }

    pub fn directives(&self) -> Vec<String> {
        vec![
            format!("port {}", self.port),
            format!("proto {}", self.proto),
            "dev tun".to_string(),
            "ca ca.crt".to_string(),
            "cert server.crt".to_string(),
            "key server.key".to_string(),
            "dh dh2048.pem".to_string(),
            format!("server {} {}", self.pool.network(), self.pool.mask()),
            "ifconfig-pool-persist ipp.txt".to_string(),
            format!(
                "push \"route {} {}\"",
                self.pushed_route.network(),
                self.pushed_route.mask()
            ),
            "push \"redirect-gateway def1\"".to_string(),
            format!("push \"dhcp-option DNS {}\"", self.dns),
        ]
    }
}

/// Inputs the script needs from other resources
pub struct BootScript {
    pub server: ServerConfig,
    pub public_ip: Output,
    pub bucket: Output,
    pub region: Output,
    pub strict: bool,
}

impl BootScript {
    pub fn new(public_ip: Output, bucket: Output, region: Output, strict: bool) -> Result<Self> {
        Ok(Self {
            server: ServerConfig::for_network(VPC_CIDR, VPN_POOL_CIDR)?,
            public_ip,
            bucket,
            region,
            strict,
        })
    }

    pub fn render(&self) -> Output {
        let mut script = Template::new();
        script.line("#!/bin/bash");
        if self.strict {
            script.line("set -euo pipefail");
        }

        self.install_packages(&mut script);
        self.build_pki(&mut script);
        self.write_server_config(&mut script);
        self.write_client_config(&mut script);
        self.enable_forwarding(&mut script);
        self.start_service(&mut script);
        self.upload_credentials(&mut script);

        script.build()
    }

    fn install_packages(&self, script: &mut Template) {
        let archive = format!("EasyRSA-{}", EASYRSA_VERSION);
        script
            .line("")
            .line("amazon-linux-extras install -y epel")
            .line("yum update -y")
            .line("yum install -y openvpn")
            .line("")
            .line(&format!(
                "wget https://github.com/OpenVPN/easy-rsa/releases/download/v{}/{}.tgz",
                EASYRSA_VERSION, archive
            ))
            .line(&format!("tar -xvzf {}.tgz", archive))
            .line(&format!("mv {} {}", archive, EASYRSA_DIR));
    }

    fn build_pki(&self, script: &mut Template) {
        script
            .line("")
            .line(&format!("cd {}/", EASYRSA_DIR))
            .line("echo 'set_var EASYRSA_BATCH \"1\"' >> vars")
            .line("./easyrsa init-pki")
            .line("./easyrsa build-ca nopass")
            .line("./easyrsa gen-dh")
            .line("./easyrsa build-server-full server nopass")
            .line("./easyrsa build-client-full client nopass")
            .line(&format!("openvpn --genkey --secret {}/ta.key", OPENVPN_DIR))
            .line("")
            .line(&format!("cp pki/ca.crt {}/", OPENVPN_DIR))
            .line(&format!("cp pki/issued/server.crt {}/", OPENVPN_DIR))
            .line(&format!("cp pki/private/server.key {}/", OPENVPN_DIR))
            .line(&format!("cp pki/dh.pem {}/dh2048.pem", OPENVPN_DIR));
    }

    fn write_server_config(&self, script: &mut Template) {
        script
            .line("")
            .line(&format!("cat > {}/server.conf <<'EOF'", OPENVPN_DIR));
        for directive in self.server.directives() {
            script.line(&directive);
        }
        script.line("EOF");
    }

    fn write_client_config(&self, script: &mut Template) {
        script
            .line("")
            .line(&format!("cat > {} <<'EOF'", CLIENT_CONFIG_PATH))
            .line("client")
            .line("dev tun")
            .line(&format!("proto {}", self.server.proto))
            .text("remote ")
            .value(&self.public_ip)
            .line(&format!(" {}", self.server.port))
            .line("ca ca.crt")
            .line("cert client.crt")
            .line("key client.key")
            .line("EOF");
    }

    fn enable_forwarding(&self, script: &mut Template) {
        script
            .line("")
            .line("echo \"net.ipv4.ip_forward = 1\" >> /etc/sysctl.conf")
            .line("sysctl -p")
            .line("")
            .line(&format!(
                "iptables -t nat -A POSTROUTING -s {} -o {} -j MASQUERADE",
                self.server.pool, NAT_INTERFACE
            ));
    }

    fn start_service(&self, script: &mut Template) {
        script
            .line("")
            .line(&format!("systemctl start {}", SERVICE_UNIT))
            .line(&format!("systemctl enable {}", SERVICE_UNIT));
    }

    fn upload_credentials(&self, script: &mut Template) {
        script.line("");
        for path in CREDENTIAL_ARTIFACTS {
            script
                .text(&format!("aws s3 cp {} s3://", path))
                .value(&self.bucket)
                .text("/ --region ")
                .value(&self.region)
                .line("");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(resource: &str, attribute: &str) -> Option<String> {
        match (resource, attribute) {
            ("elastic-ip", "public_ip") => Some("198.51.100.10".to_string()),
            ("bucket", "bucket") => Some("bucket-5e6f7a8".to_string()),
            ("bucket", "region") => Some("us-east-1".to_string()),
            _ => None,
        }
    }

    fn rendered(strict: bool) -> String {
        BootScript::new(
            Output::attr("elastic-ip", "public_ip"),
            Output::attr("bucket", "bucket"),
            Output::attr("bucket", "region"),
            strict,
        )
        .unwrap()
        .render()
        .resolve(&lookup)
        .unwrap()
    }

    #[test]
    fn server_directives_match_network_layout() {
        let server = ServerConfig::for_network(VPC_CIDR, VPN_POOL_CIDR).unwrap();
        let directives = server.directives();
        assert!(directives.contains(&"port 1194".to_string()));
        assert!(directives.contains(&"proto udp".to_string()));
        assert!(directives.contains(&"server 192.168.100.0 255.255.255.0".to_string()));
        assert!(directives.contains(&"push \"route 10.0.0.0 255.255.0.0\"".to_string()));
        assert!(directives.contains(&"push \"redirect-gateway def1\"".to_string()));
        assert!(directives.contains(&"push \"dhcp-option DNS 10.0.0.2\"".to_string()));
        assert_eq!(
            directives
                .iter()
                .filter(|d| d.starts_with("ifconfig-pool-persist"))
                .count(),
            1
        );
    }

    #[test]
    fn resolver_is_base_plus_two() {
        let server = ServerConfig::for_network("172.31.0.0/16", VPN_POOL_CIDR).unwrap();
        assert_eq!(server.dns, Ipv4Addr::new(172, 31, 0, 2));
        assert!(ServerConfig::for_network("10.0.0.0/31", VPN_POOL_CIDR).is_err());
    }

    #[test]
    fn client_config_points_at_public_address() {
        let script = rendered(false);
        assert!(script.contains("\nremote 198.51.100.10 1194\n"));
        assert!(script.contains("\ncert client.crt\n"));
    }

    #[test]
    fn uploads_the_four_artifacts() {
        let script = rendered(false);
        let uploads: Vec<&str> = script
            .lines()
            .filter(|l| l.starts_with("aws s3 cp "))
            .collect();
        assert_eq!(uploads.len(), 4);
        for line in &uploads {
            assert!(line.ends_with("s3://bucket-5e6f7a8/ --region us-east-1"), "{}", line);
        }
        assert_eq!(
            artifact_names(),
            vec!["client.ovpn", "ca.crt", "client.crt", "client.key"]
        );
    }

    #[test]
    fn steps_run_in_order() {
        let script = rendered(false);
        let pos = |needle: &str| script.find(needle).unwrap();
        assert!(pos("yum install -y openvpn") < pos("./easyrsa init-pki"));
        assert!(pos("./easyrsa build-client-full") < pos("server.conf"));
        assert!(pos("server.conf") < pos(CLIENT_CONFIG_PATH));
        assert!(pos("MASQUERADE") < pos("systemctl start"));
        assert!(pos("systemctl enable") < pos("aws s3 cp"));
    }

    #[test]
    fn stop_on_error_only_in_strict_mode() {
        assert!(!rendered(false).contains("set -e"));
        assert!(rendered(true).starts_with("#!/bin/bash\nset -euo pipefail\n"));
    }

    #[test]
    fn script_is_unknown_until_address_exists() {
        let script = BootScript::new(
            Output::attr("elastic-ip", "public_ip"),
            Output::attr("bucket", "bucket"),
            Output::attr("bucket", "region"),
            false,
        )
        .unwrap()
        .render();
        assert_eq!(script.resolve(&|_: &str, _: &str| None), None);
        let deps: Vec<String> = script.dependencies().into_iter().collect();
        assert_eq!(deps, vec!["bucket", "elastic-ip"]);
    }
}
