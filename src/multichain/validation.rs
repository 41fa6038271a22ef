use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::TransferValidationError;
use crate::types::CrossChainTransferRequest;

/// Reject malformed transfer requests before any route is looked up.
pub fn validate_transfer_request(request: &CrossChainTransferRequest) -> Result<(), TransferValidationError> {
    if request.source_chain.is_empty() {
        return Err(TransferValidationError::MissingSourceChain);
    }
    if request.dest_chain.is_empty() {
        return Err(TransferValidationError::MissingDestChain);
    }
    if request.source_chain == request.dest_chain {
        return Err(TransferValidationError::SameChain(request.source_chain.clone()));
    }
    if request.amount <= Decimal::ZERO {
        return Err(TransferValidationError::NonPositiveAmount(request.amount));
    }
    if request.from_address.is_zero() {
        return Err(TransferValidationError::ZeroFromAddress);
    }
    if request.to_address.is_zero() {
        return Err(TransferValidationError::ZeroToAddress);
    }
    if request.slippage < Decimal::ZERO || request.slippage > Decimal::ONE {
        return Err(TransferValidationError::SlippageOutOfRange(request.slippage));
    }
    if let Some(deadline) = request.deadline {
        if deadline <= Utc::now() {
            return Err(TransferValidationError::DeadlinePassed(deadline));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Address};
    use rust_decimal_macros::dec;

    fn valid_request() -> CrossChainTransferRequest {
        CrossChainTransferRequest {
            source_chain: "ethereum".to_string(),
            dest_chain: "polygon".to_string(),
            token: "USDC".to_string(),
            amount: dec!(100),
            from_address: address!("1111111111111111111111111111111111111111"),
            to_address: address!("2222222222222222222222222222222222222222"),
            slippage: dec!(0.005),
            deadline: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_transfer_request(&valid_request()).is_ok());
    }

    #[test]
    fn test_same_chain_rejected() {
        let mut request = valid_request();
        request.dest_chain = "ethereum".to_string();
        assert_eq!(
            validate_transfer_request(&request),
            Err(TransferValidationError::SameChain("ethereum".to_string()))
        );
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        for amount in [dec!(0), dec!(-5)] {
            let mut request = valid_request();
            request.amount = amount;
            assert_eq!(
                validate_transfer_request(&request),
                Err(TransferValidationError::NonPositiveAmount(amount))
            );
        }
    }

    #[test]
    fn test_slippage_bounds() {
        for slippage in [dec!(-0.01), dec!(1.01)] {
            let mut request = valid_request();
            request.slippage = slippage;
            assert_eq!(
                validate_transfer_request(&request),
                Err(TransferValidationError::SlippageOutOfRange(slippage))
            );
        }

        let mut request = valid_request();
        request.slippage = dec!(1);
        assert!(validate_transfer_request(&request).is_ok());
    }

    #[test]
    fn test_zero_addresses_rejected() {
        let mut request = valid_request();
        request.from_address = Address::ZERO;
        assert_eq!(validate_transfer_request(&request), Err(TransferValidationError::ZeroFromAddress));

        let mut request = valid_request();
        request.to_address = Address::ZERO;
        assert_eq!(validate_transfer_request(&request), Err(TransferValidationError::ZeroToAddress));
    }

    #[test]
    fn test_deadline_must_be_in_the_future() {
        let mut request = valid_request();
        let passed = Utc::now() - chrono::Duration::seconds(1);
        request.deadline = Some(passed);
        assert_eq!(
            validate_transfer_request(&request),
            Err(TransferValidationError::DeadlinePassed(passed))
        );

        request.deadline = Some(Utc::now() + chrono::Duration::minutes(10));
        assert!(validate_transfer_request(&request).is_ok());
    }

    #[test]
    fn test_missing_chains_rejected() {
        let mut request = valid_request();
        request.source_chain.clear();
        assert_eq!(validate_transfer_request(&request), Err(TransferValidationError::MissingSourceChain));

        let mut request = valid_request();
        request.dest_chain.clear();
        assert_eq!(validate_transfer_request(&request), Err(TransferValidationError::MissingDestChain));
    }
}
