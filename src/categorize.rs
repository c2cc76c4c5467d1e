//! Keyword classification of article text.
//!
//! Rules are checked in order and the first group with a substring hit
//! decides the category. Reordering `CATEGORY_RULES` changes results.

use crate::models::Category;

pub const BITCOIN_KEYWORDS: &[&str] = &["bitcoin", "btc", "satoshi"];

pub const ETHEREUM_KEYWORDS: &[&str] = &["ethereum", "eth", "ether"];

pub const DEFI_KEYWORDS: &[&str] = &[
    "defi",
    "decentralized finance",
    "yield",
    "liquidity",
    "amm",
    "dex",
    "lending",
    "borrowing",
    "staking",
    "aave",
    "curve",
    "balancer",
    "uniswap",
    "sushi",
    "yearn",
    "compound",
    "makerdao",
    "dydx",
    "gmx",
    "liquity",
    "instadapp",
    "vault",
    "governance",
    "dao",
    "perpetual",
    "derivative",
    "liquidity mining",
    "yield farming",
];

pub const NFT_KEYWORDS: &[&str] = &[
    "nft",
    "non-fungible",
    "digital art",
    "collectible",
    "opensea",
    "metaverse",
];

pub const REGULATION_KEYWORDS: &[&str] = &[
    "regulation",
    "sec",
    "government",
    "legal",
    "compliance",
    "policy",
    "law",
    "tax",
    "ban",
];

/// Altcoin coverage has no category of its own and maps to `General`.
pub const ALTCOIN_KEYWORDS: &[&str] = &[
    "altcoin",
    "alt coin",
    "cardano",
    "solana",
    "polkadot",
    "ripple",
    "xrp",
    "ada",
    "dot",
    "binance coin",
    "bnb",
    "chainlink",
    "link",
    "litecoin",
    "ltc",
    "stellar",
    "xlm",
    "vechain",
    "vet",
    "monero",
    "xmr",
    "dash",
    "neo",
    "eos",
    "tezos",
    "xtz",
    "cosmos",
    "atom",
    "avalanche",
    "avax",
    "polygon",
    "matic",
    "algorand",
    "algo",
    "filecoin",
    "fil",
    "uniswap",
    "uni",
    "the graph",
    "grt",
    "synthetix",
    "snx",
    "compound",
    "comp",
    "maker",
    "mkr",
    "0x",
    "zrx",
    "basic attention",
    "bat",
    "decentraland",
    "mana",
    "enjin",
    "enj",
    "sandbox",
    "sand",
    "axie infinity",
    "axs",
    "gala",
    "illuvium",
    "ilv",
    "stepn",
    "gmt",
    "move to earn",
    "play to earn",
    "p2e",
    "gamefi",
    "metaverse",
    "web3",
    "layer 2",
    "l2",
    "rollup",
    "optimism",
    "arbitrum",
    "bsc",
    "binance smart chain",
    "fantom",
    "ftm",
    "harmony",
    "one",
    "near",
    "aurora",
    "celo",
    "klaytn",
    "klay",
    "elrond",
    "egld",
    "hedera",
    "hbar",
    "iota",
    "miota",
    "nano",
    "xno",
    "raiblocks",
    "xrb",
];

/// Priority order, highest first
pub const CATEGORY_RULES: &[(Category, &[&str])] = &[
    (Category::Bitcoin, BITCOIN_KEYWORDS),
    (Category::Ethereum, ETHEREUM_KEYWORDS),
    (Category::Defi, DEFI_KEYWORDS),
    (Category::Nft, NFT_KEYWORDS),
    (Category::Regulation, REGULATION_KEYWORDS),
    (Category::General, ALTCOIN_KEYWORDS),
];

pub fn categorize(title: &str, description: &str) -> Category {
    let text = format!("{} {}", title, description).to_lowercase();

    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map(|(category, _)| *category)
        .unwrap_or(Category::General)
}
