//! Solidity interfaces the client talks to.
//!
//! Call data is built with `SolCall::abi_encode` and return data decoded
//! with `SolCall::abi_decode_returns`; the structs mirror the on-chain ones
//! field for field.

use alloy_primitives::U256;
use alloy_sol_types::sol;
use tick3t_common::{EventInfo, Tick3tError, TicketInfo};

sol! {
    /// Return value of `getEventInfo()`.
    #[derive(Debug, PartialEq, Eq)]
    struct EventDetails {
        string name;
        string url;
        uint256 time;
        string location;
        string photo;
        uint256 n_tickets;
        uint256 n_tickets_sold;
        uint256 price;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TicketDetails {
        address ticketOwner;
        uint256 ticketNumber;
        bool isValid;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Seal {
        bytes4 verifierSelector;
        bytes32[8] seal;
        uint8 mode;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct CallAssumptions {
        address proverContractAddress;
        bytes4 functionSelector;
        uint256 settleBlockNumber;
        bytes32 settleBlockHash;
    }

    /// vlayer proof, first argument of every proof-verified call.
    #[derive(Debug, PartialEq, Eq)]
    struct Proof {
        Seal seal;
        bytes32 callGuestId;
        uint256 length;
        CallAssumptions callAssumptions;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct UnverifiedEmail {
        string email;
        string[] dnsRecords;
    }

    /// One event's ticketing contract. `buy_0` is the plain purchase,
    /// `buy_1` the email-proof gated one.
    #[derive(Debug, PartialEq, Eq)]
    interface IEventTicketing {
        function getEventInfo() external view returns (EventDetails memory);
        function buy() external payable;
        function buy(Proof calldata proof) external payable;
        function getTicketInfo(uint256 tokenId) external view returns (TicketDetails memory);
        function hasTicket(address owner) external view returns (bool);
        function verifyTicket(uint256 tokenId) external view returns (bool);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IEventFactory {
        function createEvent(
            string name,
            string url,
            uint256 time,
            string location,
            string photo,
            uint256 nTickets,
            uint256 price,
            string uri
        ) external returns (address);
        function getFutureEvents() external view returns (address[] memory);
        function getPastEvents() external view returns (address[] memory);
        function getEventsByOwner(address owner) external view returns (address[] memory);
        function getEventCounts() external view returns (uint256 future, uint256 past);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface ISimpleAccountFactory {
        function getAddress(address owner, uint256 salt) external view returns (address);
        function createAccount(address owner, uint256 salt) external returns (address);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface ISimpleAccount {
        function execute(address dest, uint256 value, bytes calldata func) external;
        function executeBatch(address[] calldata dest, bytes[] calldata func) external;
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }

    /// Email prover run by the hosted vlayer prover.
    #[derive(Debug, PartialEq, Eq)]
    interface IEmailProver {
        function main(UnverifiedEmail calldata unverifiedEmail) external;
    }
}

impl TryFrom<EventDetails> for EventInfo {
    type Error = Tick3tError;

    fn try_from(d: EventDetails) -> Result<Self, Self::Error> {
        Ok(EventInfo {
            name: d.name,
            url: d.url,
            time: u64::try_from(d.time)
                .map_err(|_| Tick3tError::ReadFailed("event time out of range".into()))?,
            location: d.location,
            photo: d.photo,
            n_tickets: d.n_tickets,
            n_tickets_sold: d.n_tickets_sold,
            price: d.price,
        })
    }
}

impl From<EventInfo> for EventDetails {
    fn from(e: EventInfo) -> Self {
        EventDetails {
            name: e.name,
            url: e.url,
            time: U256::from(e.time),
            location: e.location,
            photo: e.photo,
            n_tickets: e.n_tickets,
            n_tickets_sold: e.n_tickets_sold,
            price: e.price,
        }
    }
}

impl From<TicketDetails> for TicketInfo {
    fn from(t: TicketDetails) -> Self {
        TicketInfo {
            ticket_owner: t.ticketOwner.into(),
            ticket_number: t.ticketNumber,
            is_valid: t.isValid,
        }
    }
}
