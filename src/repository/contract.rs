use alloy::sol;

// ABI bindings for the Uniswap V2 deployment and the test tokens on the Bitcoin-EVM network
sol! {
    /// ERC20 token interface, including the faucet `mint` exposed by the test tokens.
    #[sol(rpc)]
    interface IERC20 {
        /// Returns the token balance of the specified account.
        function balanceOf(address account) external view returns (uint256);

        /// Returns the number of decimals used by the token (8 for TBTC, 18 for WBTC).
        function decimals() external view returns (uint8);

        /// Returns the token symbol.
        function symbol() external view returns (string memory);

        /// Returns the remaining amount `spender` may transfer on behalf of `owner`.
        function allowance(address owner, address spender) external view returns (uint256);

        /// Sets `amount` as the allowance of `spender` over the caller's tokens.
        ///
        /// Setting the same allowance twice leaves the same final state.
        function approve(address spender, uint256 amount) external returns (bool);

        /// Mints `amount` test tokens to `to`. Only present on the faucet test tokens.
        function mint(address to, uint256 amount) external;
    }

    /// Wrapped native coin (WBTC on the Bitcoin-EVM network).
    #[sol(rpc)]
    interface IWBTC {
        /// Wraps the attached native value into tokens credited to the caller.
        function deposit() external payable;
    }

    /// Uniswap V2 Pair interface for liquidity pool reads.
    #[sol(rpc)]
    interface IUniswapV2Pair {
        /// Returns the reserves of both tokens in the pair and the last block timestamp.
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);

        /// Returns the address of the first token in the pair.
        function token0() external view returns (address);

        /// Returns the address of the second token in the pair.
        function token1() external view returns (address);
    }

    /// Uniswap V2 Factory interface for pair discovery.
    #[sol(rpc)]
    interface IUniswapV2Factory {
        /// Returns the pair address for two tokens, or zero address if no pair exists.
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }

    /// Uniswap V2 Router02 interface for quotes, swaps and liquidity provisioning.
    #[sol(rpc)]
    interface IUniswapV2Router02 {
        /// Given an input amount and a token path, returns the output amount at every hop.
        function getAmountsOut(uint256 amountIn, address[] calldata path) external view returns (uint256[] memory amounts);

        /// Swaps an exact amount of input tokens for as many output tokens as possible.
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);

        /// Deposits both tokens into the pair, creating it on first use.
        function addLiquidity(
            address tokenA,
            address tokenB,
            uint256 amountADesired,
            uint256 amountBDesired,
            uint256 amountAMin,
            uint256 amountBMin,
            address to,
            uint256 deadline
        ) external returns (uint256 amountA, uint256 amountB, uint256 liquidity);
    }
}
