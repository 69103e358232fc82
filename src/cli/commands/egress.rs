use clap::{Arg, ArgAction, ArgMatches, Command};
use ipnetwork::IpNetwork;

use crate::egress::BlockList;

pub const ARG_EGRESS_ALLOW_LOOPBACK: &str = "egress-allow-loopback";
pub const ARG_EGRESS_BLOCK_CIDR: &str = "egress-block-cidr";

#[derive(Debug, Default)]
pub struct Options {
    pub allow_loopback: bool,
    pub block_cidrs: Vec<IpNetwork>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            allow_loopback: matches.get_flag(ARG_EGRESS_ALLOW_LOOPBACK),
            block_cidrs: matches
                .get_many::<IpNetwork>(ARG_EGRESS_BLOCK_CIDR)
                .map(|values| values.copied().collect())
                .unwrap_or_default(),
        }
    }

    /// Freeze the options into the shared block list.
    #[must_use]
    pub fn blocklist(&self) -> BlockList {
        let builder = self
            .block_cidrs
            .iter()
            .fold(BlockList::builder(), |builder, cidr| builder.prepend(*cidr));
        if self.allow_loopback {
            builder.allow_loopback().build()
        } else {
            builder.build()
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EGRESS_ALLOW_LOOPBACK)
                .long(ARG_EGRESS_ALLOW_LOOPBACK)
                .help("Let outbound requests reach 127.0.0.0/8, for local development")
                .env("WARDEN_EGRESS_ALLOW_LOOPBACK")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_EGRESS_BLOCK_CIDR)
                .long(ARG_EGRESS_BLOCK_CIDR)
                .help("Extra range outbound requests may not reach, can be repeated")
                .env("WARDEN_EGRESS_BLOCK_CIDR")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(IpNetwork)),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn options_shape_the_blocklist() {
        let options = Options {
            allow_loopback: true,
            block_cidrs: vec!["8.8.8.0/24".parse().unwrap()],
        };
        let list = options.blocklist();
        assert!(!list.is_private("127.0.0.1".parse().unwrap()));
        assert!(list.is_private("8.8.8.8".parse().unwrap()));

        let list = Options::default().blocklist();
        assert!(list.is_private("127.0.0.1".parse().unwrap()));
    }
}
